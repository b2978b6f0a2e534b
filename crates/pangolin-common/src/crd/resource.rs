//! PangolinResource CRD
//!
//! A resource exposes one backend through a tunnel, either as an HTTP
//! subdomain or as a raw TCP/UDP proxy port, together with the target that
//! traffic is forwarded to.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    BindingMode, Condition, HttpConfig, LocalObjectReference, Protocol, ProxyConfig,
    ReconcilePhase,
};
use crate::condition::is_ready;

/// Finalizer placed on every PangolinResource
pub const RESOURCE_FINALIZER: &str = "resource.pangolin.io/finalizer";

/// A service exposed through a Pangolin tunnel.
///
/// Example:
/// ```yaml
/// apiVersion: tunnel.pangolin.io/v1alpha1
/// kind: PangolinResource
/// metadata:
///   name: app
/// spec:
///   tunnelRef:
///     name: edge
///   protocol: http
///   httpConfig:
///     subdomain: app
///   target:
///     ip: 10.0.0.12
///     port: 8080
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tunnel.pangolin.io",
    version = "v1alpha1",
    kind = "PangolinResource",
    namespaced,
    shortname = "pres",
    status = "PangolinResourceStatus",
    printcolumn = r#"{"name":"Protocol","type":"string","jsonPath":".spec.protocol"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PangolinResourceSpec {
    /// Tunnel the resource is served through
    pub tunnel_ref: LocalObjectReference,

    /// Display name (default: object name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Exposed protocol
    pub protocol: Protocol,

    /// Id of an existing resource to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Required for `http`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_config: Option<HttpConfig>,

    /// Required for `tcp` and `udp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_config: Option<ProxyConfig>,

    /// Backend traffic is forwarded to
    pub target: TargetConfig,
}

/// Forwarding target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Backend address
    pub ip: String,

    /// Backend port
    pub port: i32,

    /// Forwarding method (default: derived from protocol)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Whether the target receives traffic
    #[serde(default = "super::default_true")]
    pub enabled: bool,
}

/// PangolinResource status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PangolinResourceStatus {
    /// Control plane resource id; never overwritten once set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,

    /// Control plane target id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    /// Bound when spec names a resource, Created otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_mode: Option<BindingMode>,

    /// Resolved hostname for HTTP resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_domain: Option<String>,

    /// Public URL for HTTP resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Public endpoint for TCP/UDP resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_endpoint: Option<String>,

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

impl PangolinResourceSpec {
    /// Check that exactly the config matching the protocol is set
    pub fn validate(&self) -> Result<(), String> {
        let protocol = self.protocol;
        if protocol.is_http() {
            if self.http_config.is_none() {
                return Err("httpConfig is required for protocol http".into());
            }
            if self.proxy_config.is_some() {
                return Err("proxyConfig must not be set for protocol http".into());
            }
        } else {
            if self.proxy_config.is_none() {
                return Err(format!("proxyConfig is required for protocol {protocol}"));
            }
            if self.http_config.is_some() {
                return Err(format!("httpConfig must not be set for protocol {protocol}"));
            }
        }
        Ok(())
    }

    /// Forwarding method for the target
    pub fn target_method(&self) -> String {
        self.target
            .method
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.protocol.default_target_method().to_string())
    }
}

impl PangolinResource {
    /// Whether the Ready condition is True
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_ready(&s.conditions))
    }
}
