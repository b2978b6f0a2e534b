//! Wire types for the Pangolin API
//!
//! The API is inconsistent about identifier encoding: the same id may come
//! back as a JSON number or a string, and under either `id` or a
//! kind-specific field. Raw shapes are normalized on deserialization so the
//! rest of the operator only ever sees one canonical field.

use serde::{Deserialize, Serialize};

/// Identifier that may be encoded as a number or a string
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
enum FlexId {
    Number(i64),
    Text(String),
}

impl FlexId {
    fn into_string(self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) if s.is_empty() => None,
            Self::Text(s) => Some(s),
        }
    }

    fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

/// Pick the first present, non-empty id
fn first_id(candidates: [Option<FlexId>; 2]) -> Option<String> {
    candidates.into_iter().flatten().find_map(FlexId::into_string)
}

/// An organization visible to the API key
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    /// Organization id
    pub org_id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Organization subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

/// A domain registered with an organization
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "RawDomain", rename_all = "camelCase")]
pub struct Domain {
    /// Domain id
    pub domain_id: String,
    /// Base domain
    pub base_domain: String,
    /// Whether ownership is verified
    pub verified: bool,
    /// Domain type (ns, cname, wildcard)
    #[serde(rename = "type")]
    pub type_: Option<String>,
    /// Whether verification failed
    pub failed: bool,
    /// Verification attempts
    pub tries: i64,
    /// Whether the domain is managed by control plane configuration
    pub config_managed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDomain {
    domain_id: Option<FlexId>,
    #[serde(default)]
    base_domain: String,
    #[serde(default)]
    verified: bool,
    #[serde(default, rename = "type")]
    type_: Option<String>,
    #[serde(default)]
    failed: bool,
    #[serde(default)]
    tries: i64,
    #[serde(default)]
    config_managed: bool,
}

impl From<RawDomain> for Domain {
    fn from(raw: RawDomain) -> Self {
        Self {
            domain_id: raw.domain_id.and_then(FlexId::into_string).unwrap_or_default(),
            base_domain: raw.base_domain,
            verified: raw.verified,
            type_: raw.type_,
            failed: raw.failed,
            tries: raw.tries,
            config_managed: raw.config_managed,
        }
    }
}

/// A site (tunnel endpoint)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "RawSite", rename_all = "camelCase")]
pub struct Site {
    /// Numeric site id
    pub site_id: i64,
    /// Human-friendly id, unique within the organization
    pub nice_id: Option<String>,
    /// Site name
    pub name: String,
    /// Site type (newt, wireguard, local)
    #[serde(rename = "type")]
    pub type_: Option<String>,
    /// Site subnet
    pub subnet: Option<String>,
    /// Site address
    pub address: Option<String>,
    /// Whether the site is connected
    pub online: bool,
    /// Public endpoint
    pub endpoint: Option<String>,
    /// Newt client id, returned on creation of newt sites
    pub newt_id: Option<String>,
    /// Newt client secret, returned on creation of newt sites
    pub newt_secret: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSite {
    site_id: Option<FlexId>,
    id: Option<FlexId>,
    nice_id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    type_: Option<String>,
    subnet: Option<String>,
    address: Option<String>,
    #[serde(default)]
    online: bool,
    endpoint: Option<String>,
    newt_id: Option<FlexId>,
    #[serde(alias = "newtSecretKey")]
    newt_secret: Option<String>,
    secret: Option<String>,
}

impl TryFrom<RawSite> for Site {
    type Error = String;

    fn try_from(raw: RawSite) -> Result<Self, Self::Error> {
        let site_id = raw
            .site_id
            .as_ref()
            .or(raw.id.as_ref())
            .and_then(FlexId::to_i64)
            .ok_or("site has no numeric siteId")?;
        Ok(Self {
            site_id,
            nice_id: raw.nice_id.filter(|n| !n.is_empty()),
            name: raw.name,
            type_: raw.type_,
            subnet: raw.subnet,
            address: raw.address,
            online: raw.online,
            endpoint: raw.endpoint,
            newt_id: raw.newt_id.and_then(FlexId::into_string),
            newt_secret: raw.newt_secret.or(raw.secret).filter(|s| !s.is_empty()),
        })
    }
}

/// Body of a create-site call
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CreateSiteRequest {
    /// Site name
    pub name: String,
    /// Site type
    #[serde(rename = "type")]
    pub type_: String,
}

/// A resource as returned by create-resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "RawResource", rename_all = "camelCase")]
pub struct Resource {
    /// Canonical resource id (from `id` or `resourceId`)
    pub id: String,
    /// Resource name
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResource {
    id: Option<FlexId>,
    resource_id: Option<FlexId>,
    #[serde(default)]
    name: String,
}

impl TryFrom<RawResource> for Resource {
    type Error = String;

    fn try_from(raw: RawResource) -> Result<Self, Self::Error> {
        let id = first_id([raw.id, raw.resource_id]).ok_or("resource has no id or resourceId")?;
        Ok(Self { id, name: raw.name })
    }
}

/// Body of a create-resource call
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    /// Display name
    pub name: String,
    /// Site the resource is served through
    pub site_id: i64,
    /// Whether this is an HTTP resource
    pub http: bool,
    /// Transport protocol (`tcp` for HTTP resources)
    pub protocol: String,
    /// Subdomain (HTTP only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    /// Domain id (HTTP only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
    /// Public proxy port (TCP/UDP only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<i32>,
    /// Whether the proxy listener is enabled (TCP/UDP only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_proxy: Option<bool>,
}

impl CreateResourceRequest {
    /// HTTP resource; the control plane expects `tcp` as the transport
    pub fn http(
        name: impl Into<String>,
        site_id: i64,
        subdomain: impl Into<String>,
        domain_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            site_id,
            http: true,
            protocol: "tcp".to_string(),
            subdomain: Some(subdomain.into()),
            domain_id: Some(domain_id.into()),
            ..Default::default()
        }
    }

    /// Raw TCP or UDP proxy resource
    pub fn proxy(
        name: impl Into<String>,
        site_id: i64,
        protocol: impl Into<String>,
        proxy_port: i32,
        enable_proxy: bool,
    ) -> Self {
        Self {
            name: name.into(),
            site_id,
            http: false,
            protocol: protocol.into(),
            proxy_port: Some(proxy_port),
            enable_proxy: Some(enable_proxy),
            ..Default::default()
        }
    }
}

/// A forwarding target as returned by create-target
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "RawTarget", rename_all = "camelCase")]
pub struct Target {
    /// Canonical target id (from `id` or `targetId`)
    pub id: String,
    /// Backend address
    pub ip: String,
    /// Backend port
    pub port: i32,
    /// Forwarding method
    pub method: String,
    /// Whether the target is enabled
    pub enabled: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTarget {
    id: Option<FlexId>,
    target_id: Option<FlexId>,
    #[serde(default)]
    ip: String,
    #[serde(default)]
    port: i32,
    #[serde(default)]
    method: String,
    #[serde(default)]
    enabled: bool,
}

impl TryFrom<RawTarget> for Target {
    type Error = String;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        let id = first_id([raw.id, raw.target_id]).ok_or("target has no id or targetId")?;
        Ok(Self {
            id,
            ip: raw.ip,
            port: raw.port,
            method: raw.method,
            enabled: raw.enabled,
        })
    }
}

/// Body of a create-target call
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CreateTargetRequest {
    /// Backend address
    pub ip: String,
    /// Backend port
    pub port: i32,
    /// Forwarding method
    pub method: String,
    /// Whether the target is enabled
    pub enabled: bool,
}
