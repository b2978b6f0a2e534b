//! Reconcilers for the Pangolin operator
//!
//! Four reconcilers (Organization, Tunnel, Resource, Binding) converge their
//! objects against the Pangolin control plane. Cross-kind dependencies are
//! expressed only by reading a dependency's persisted status and gating on its
//! Ready condition; reconcilers never call each other.
//!
//! Delivery is explicit: watchers feed a [`queue::WorkQueue`] per kind and the
//! [`runner`] drives reconcilers registered in a [`registry::ControllerRegistry`].

#![deny(missing_docs)]

pub mod binding;
pub mod connector;
pub mod context;
pub mod lifecycle;
pub mod organization;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod runner;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use context::{
    ControlPlane, ControlPlaneFactory, Context, ContextBuilder, KubeClient, KubeClientImpl,
    PangolinControlPlaneFactory,
};
pub use lifecycle::{Action, ObjectKey, Outcome};
pub use registry::{ControllerRegistry, ResourceKind};
pub use runner::{Runner, RunnerConfig};
