//! Common types for the Pangolin operator: CRDs, conditions, errors, and utilities

#![deny(missing_docs)]

pub mod condition;
pub mod crd;
pub mod domain;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by all Pangolin CRDs
pub const API_GROUP: &str = "tunnel.pangolin.io";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "pangolin-operator";

/// Requeue interval for `Error` and `Waiting` outcomes
///
/// Both outcomes share this cadence; a permanently misconfigured object is
/// retried at the same rate as a transient failure.
pub const RECHECK_INTERVAL_SECS: u64 = 60;

/// Default container image for the Newt connector
pub const DEFAULT_NEWT_IMAGE: &str = "fosrl/newt:latest";

/// Site type whose sites are served by a managed Newt connector
pub const NEWT_SITE_TYPE: &str = "newt";

/// Label applied to every object the operator generates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "pangolin-operator";
