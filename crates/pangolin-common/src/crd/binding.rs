//! PangolinBinding CRD
//!
//! A binding exposes a Kubernetes Service through a tunnel by generating and
//! owning a PangolinResource that targets the Service's cluster address.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    Condition, HttpConfig, LocalObjectReference, Protocol, ProxyConfig, ReconcilePhase,
};

/// Finalizer placed on every PangolinBinding
pub const BINDING_FINALIZER: &str = "binding.pangolin.io/finalizer";

/// Exposes a Service through a Pangolin tunnel.
///
/// Example:
/// ```yaml
/// apiVersion: tunnel.pangolin.io/v1alpha1
/// kind: PangolinBinding
/// metadata:
///   name: web
/// spec:
///   serviceRef:
///     name: web
///   organizationRef:
///     name: acme
///   tunnelRef:
///     name: edge
///   protocol: http
///   servicePort: 80
///   httpConfig:
///     subdomain: web
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tunnel.pangolin.io",
    version = "v1alpha1",
    kind = "PangolinBinding",
    namespaced,
    shortname = "pbind",
    status = "PangolinBindingStatus",
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.serviceRef.name"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PangolinBindingSpec {
    /// Service to expose
    pub service_ref: ServiceReference,

    /// Owning organization
    pub organization_ref: LocalObjectReference,

    /// Tunnel to expose the Service through; required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_ref: Option<LocalObjectReference>,

    /// Exposed protocol
    pub protocol: Protocol,

    /// Service port traffic is forwarded to
    pub service_port: i32,

    /// Required for `http`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_config: Option<HttpConfig>,

    /// Required for `tcp` and `udp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_config: Option<ProxyConfig>,

    /// Record the Service's live endpoint addresses in status
    #[serde(default = "super::default_true")]
    pub auto_update_targets: bool,
}

/// Reference to a Service, optionally in another namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    /// Service name
    pub name: String,

    /// Service namespace (default: the binding's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// PangolinBinding status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PangolinBindingStatus {
    /// Name of the generated PangolinResource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_resource_name: Option<String>,

    /// Public URL copied from the generated resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Proxy endpoint copied from the generated resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_endpoint: Option<String>,

    /// Live endpoint addresses of the Service (`ip:port`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<String>,

    /// Outcome of the last reconcile
    #[serde(default)]
    pub status: ReconcilePhase,

    /// Conditions (a single Ready condition)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl PangolinBinding {
    /// Name of the PangolinResource generated for this binding
    pub fn generated_resource_name(&self) -> String {
        format!("{}-binding", self.name_any())
    }

    /// Display name given to the generated resource
    pub fn generated_display_name(&self) -> String {
        format!("{}-{}", self.spec.service_ref.name, self.spec.protocol)
    }

    /// Namespace of the referenced Service
    pub fn service_namespace(&self) -> String {
        self.spec
            .service_ref
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.namespace())
            .unwrap_or_else(|| "default".to_string())
    }
}
