//! Client for the Pangolin control plane API
//!
//! Every call goes to `<endpoint>/v1/...` with a bearer key and returns the
//! `data` member of the `{success, data}` envelope.

#![deny(missing_docs)]

mod client;
mod endpoint;
mod error;
mod types;

pub use client::PangolinClient;
pub use endpoint::{endpoint_host, endpoint_origin};
pub use error::ClientError;
pub use types::{
    CreateResourceRequest, CreateSiteRequest, CreateTargetRequest, Domain, Organization,
    Resource, Site, Target,
};
