//! PangolinTunnel CRD
//!
//! A tunnel is a Pangolin "site": the endpoint traffic is forwarded through.
//! It either binds to an existing site (`siteId` or `niceId`) or creates one.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BindingMode, Condition, LocalObjectReference, ReconcilePhase};
use crate::condition::is_ready;

/// Finalizer placed on every PangolinTunnel
pub const TUNNEL_FINALIZER: &str = "tunnel.pangolin.io/finalizer";

/// A Pangolin site reachable through this cluster.
///
/// Example:
/// ```yaml
/// apiVersion: tunnel.pangolin.io/v1alpha1
/// kind: PangolinTunnel
/// metadata:
///   name: edge
/// spec:
///   organizationRef:
///     name: acme
///   siteName: edge
///   siteType: newt
///   newtClient:
///     enabled: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tunnel.pangolin.io",
    version = "v1alpha1",
    kind = "PangolinTunnel",
    namespaced,
    shortname = "ptunnel",
    status = "PangolinTunnelStatus",
    printcolumn = r#"{"name":"Site ID","type":"integer","jsonPath":".status.siteId"}"#,
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".status.bindingMode"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PangolinTunnelSpec {
    /// Owning organization
    pub organization_ref: LocalObjectReference,

    /// Numeric id of an existing site to bind to; wins over `niceId`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<i64>,

    /// Nice id of an existing site to bind to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nice_id: Option<String>,

    /// Name for a created site (default: object name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,

    /// Type for a created site: newt, wireguard, local
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_type: Option<String>,

    /// Managed Newt connector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newt_client: Option<NewtClientSpec>,
}

/// Managed Newt connector settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewtClientSpec {
    /// Whether the operator runs a Newt deployment for this site
    #[serde(default)]
    pub enabled: bool,

    /// Replica count (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Container image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// PangolinTunnel status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PangolinTunnelStatus {
    /// Control plane site id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<i64>,

    /// Site nice id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nice_id: Option<String>,

    /// Site name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,

    /// Site type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_type: Option<String>,

    /// Site subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    /// Site address inside the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Whether the control plane sees the site as online
    #[serde(default)]
    pub online: bool,

    /// Public endpoint of the site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bound when spec names a site, Created otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_mode: Option<BindingMode>,

    /// Secret holding the Newt credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newt_secret_ref: Option<String>,

    /// Ready replicas of the Newt deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

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

impl PangolinTunnelSpec {
    /// Whether the spec names an existing site
    pub fn binds_existing_site(&self) -> bool {
        self.site_id.is_some() || self.nice_id.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Whether a Newt deployment is requested
    pub fn newt_enabled(&self) -> bool {
        self.newt_client.as_ref().is_some_and(|n| n.enabled)
    }
}

impl PangolinTunnel {
    /// Whether the Ready condition is True
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_ready(&s.conditions))
    }

    /// Site id recorded in status
    pub fn site_id(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.site_id)
    }
}
