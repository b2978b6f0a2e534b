//! Custom Resource Definitions for the Pangolin operator
//!
//! All kinds live in the `tunnel.pangolin.io/v1alpha1` group and are
//! namespaced. Dependents only ever read a dependency's status ids and its
//! Ready condition.

mod binding;
mod organization;
mod resource;
mod tunnel;
mod types;

pub use binding::{
    PangolinBinding, PangolinBindingSpec, PangolinBindingStatus, ServiceReference,
    BINDING_FINALIZER,
};
pub use organization::{
    OrganizationDefaults, OrganizationDomain, PangolinOrganization, PangolinOrganizationSpec,
    PangolinOrganizationStatus, ORGANIZATION_FINALIZER,
};
pub use resource::{
    PangolinResource, PangolinResourceSpec, PangolinResourceStatus, TargetConfig,
    RESOURCE_FINALIZER,
};
pub use tunnel::{
    NewtClientSpec, PangolinTunnel, PangolinTunnelSpec, PangolinTunnelStatus, TUNNEL_FINALIZER,
};
pub use types::{
    BindingMode, Condition, ConditionStatus, HttpConfig, LocalObjectReference, Protocol,
    ProxyConfig, ReconcilePhase, SecretKeyRef,
};

/// API version shared by all kinds
pub const API_VERSION: &str = "tunnel.pangolin.io/v1alpha1";

pub(crate) fn default_true() -> bool {
    true
}
