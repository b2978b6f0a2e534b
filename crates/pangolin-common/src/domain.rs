//! Domain resolution against an organization's cached domain inventory

use tracing::warn;

use crate::crd::{HttpConfig, OrganizationDomain};
use crate::{Error, Result};

/// Domain chosen for an HTTP resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDomain {
    /// Control plane domain id
    pub domain_id: String,
    /// `<subdomain>.<baseDomain>`
    pub full_hostname: String,
}

/// Resolve the domain for an HTTP resource.
///
/// Priority: explicit `domainId`, then explicit `domainName` matched against
/// base domains, then the organization's default domain. Every step must hit
/// the inventory; a miss at the first applicable step is an error.
pub fn resolve_domain(
    http: &HttpConfig,
    inventory: &[OrganizationDomain],
    default_domain_id: Option<&str>,
) -> Result<ResolvedDomain> {
    let domain = if let Some(id) = non_empty(http.domain_id.as_deref()) {
        find_by_id(inventory, id)
            .ok_or_else(|| Error::validation(format!("domain {id} not found in organization")))?
    } else if let Some(name) = non_empty(http.domain_name.as_deref()) {
        find_by_base(inventory, name).ok_or_else(|| {
            Error::validation(format!("domain name {name} not found in organization"))
        })?
    } else {
        let id = non_empty(default_domain_id).ok_or_else(|| {
            Error::validation("no domain specified and organization has no default domain")
        })?;
        find_by_id(inventory, id).ok_or_else(|| {
            Error::validation(format!("default domain {id} not found in organization"))
        })?
    };

    Ok(ResolvedDomain {
        domain_id: domain.domain_id.clone(),
        full_hostname: format!("{}.{}", http.subdomain, domain.base_domain),
    })
}

/// Resolve an organization's default domain id.
///
/// A configured selector is matched by id, then by base domain. A selector
/// that matches nothing is logged and resolution falls through to the first
/// verified domain.
pub fn resolve_default_domain(
    selector: Option<&str>,
    inventory: &[OrganizationDomain],
) -> Option<String> {
    if let Some(selector) = non_empty(selector) {
        let found = find_by_id(inventory, selector).or_else(|| find_by_base(inventory, selector));
        if let Some(d) = found {
            return Some(d.domain_id.clone());
        }
        warn!(
            default_domain = %selector,
            "configured default domain not found in organization inventory"
        );
    }

    inventory
        .iter()
        .find(|d| d.verified)
        .map(|d| d.domain_id.clone())
}

fn find_by_id<'a>(inventory: &'a [OrganizationDomain], id: &str) -> Option<&'a OrganizationDomain> {
    inventory.iter().find(|d| d.domain_id == id)
}

fn find_by_base<'a>(
    inventory: &'a [OrganizationDomain],
    base: &str,
) -> Option<&'a OrganizationDomain> {
    inventory.iter().find(|d| d.base_domain == base)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}
