//! PangolinOrganization CRD
//!
//! An organization binds the cluster to one tenant of the Pangolin control
//! plane. It carries the API endpoint and credential every dependent object
//! uses, and caches the tenant's domain inventory in status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{BindingMode, Condition, ReconcilePhase, SecretKeyRef};
use crate::condition::is_ready;

/// Finalizer placed on every PangolinOrganization
pub const ORGANIZATION_FINALIZER: &str = "organization.pangolin.io/finalizer";

/// Binds to (or discovers) a Pangolin organization.
///
/// Example:
/// ```yaml
/// apiVersion: tunnel.pangolin.io/v1alpha1
/// kind: PangolinOrganization
/// metadata:
///   name: acme
/// spec:
///   apiEndpoint: https://pangolin.example.com/api
///   apiKeyRef:
///     name: pangolin-api
///     key: token
///   organizationId: org1
///   defaults:
///     defaultDomain: example.com
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tunnel.pangolin.io",
    version = "v1alpha1",
    kind = "PangolinOrganization",
    namespaced,
    shortname = "porg",
    status = "PangolinOrganizationStatus",
    printcolumn = r#"{"name":"Org ID","type":"string","jsonPath":".status.organizationId"}"#,
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".status.bindingMode"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PangolinOrganizationSpec {
    /// Base URL of the Pangolin API (without the `/v1` suffix)
    pub api_endpoint: String,

    /// Secret key holding the bearer API key
    pub api_key_ref: SecretKeyRef,

    /// Organization to bind to; when unset the first organization visible to
    /// the key is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Defaults applied to tunnels and resources under this organization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<OrganizationDefaults>,
}

/// Organization-wide defaults
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDefaults {
    /// Default domain, by id or base domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_domain: Option<String>,

    /// Site type for tunnels that don't set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_type: Option<String>,
}

/// A domain registered with the organization
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationDomain {
    /// Control plane domain id
    pub domain_id: String,

    /// Base domain, e.g. "example.com"
    pub base_domain: String,

    /// Whether ownership of the domain has been verified
    #[serde(default)]
    pub verified: bool,

    /// Domain type as reported by the control plane (ns, cname, wildcard)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Whether verification failed
    #[serde(default)]
    pub failed: bool,

    /// Verification attempts so far
    #[serde(default)]
    pub tries: i64,

    /// Whether the domain is managed by control plane configuration
    #[serde(default)]
    pub config_managed: bool,
}

/// PangolinOrganization status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PangolinOrganizationStatus {
    /// Resolved organization id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Organization display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,

    /// Organization subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,

    /// Bound when `spec.organizationId` is set, Discovered otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_mode: Option<BindingMode>,

    /// Domain inventory, refreshed every reconcile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<OrganizationDomain>,

    /// Resolved default domain id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_domain_id: Option<String>,

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

impl PangolinOrganization {
    /// Whether the Ready condition is True
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_ready(&s.conditions))
    }

    /// Resolved organization id, if non-empty
    pub fn organization_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.organization_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Cached domain inventory
    pub fn domains(&self) -> &[OrganizationDomain] {
        self.status
            .as_ref()
            .map(|s| s.domains.as_slice())
            .unwrap_or_default()
    }

    /// Resolved default domain id
    pub fn default_domain_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.default_domain_id.as_deref())
    }

    /// Site type configured for new tunnels, if any
    pub fn default_site_type(&self) -> Option<&str> {
        self.spec
            .defaults
            .as_ref()
            .and_then(|d| d.site_type.as_deref())
            .filter(|t| !t.is_empty())
    }
}
