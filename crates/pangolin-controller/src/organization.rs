//! PangolinOrganization reconciler
//!
//! Resolves the control plane organization (bound by id or discovered as the
//! first visible one), caches its domain inventory in status and picks the
//! default domain that HTTP resources fall back to.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use pangolin_client::Domain;
use pangolin_common::crd::{
    BindingMode, OrganizationDomain, PangolinOrganization, PangolinOrganizationStatus,
    ORGANIZATION_FINALIZER,
};
use pangolin_common::domain::resolve_default_domain;
use pangolin_common::kube_utils::object_ref;
use pangolin_common::Error;

use crate::context::Context;
use crate::lifecycle::{finalizer_gate, Action, ObjectKey, Outcome, OutcomeStatus};
use crate::registry::ResourceKind;

/// Reconcile a PangolinOrganization
#[instrument(skip(ctx), fields(organization = %key))]
pub async fn reconcile(key: ObjectKey, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(mut org) = ctx.kube.get_organization(&key.namespace, &key.name).await? else {
        debug!("organization not found, assuming deleted");
        return Ok(Action::await_change());
    };

    if let Some(action) = finalizer_gate(
        ctx.kube.as_ref(),
        ResourceKind::Organization,
        &org,
        ORGANIZATION_FINALIZER,
    )
    .await?
    {
        return Ok(action);
    }

    let mut status = org.status.clone().unwrap_or_default();
    let outcome = match converge(&ctx, &org, &mut status).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "organization reconcile failed");
            Outcome::error(&e)
        }
    };

    status.record(&outcome, org.metadata.generation);
    org.status = Some(status);
    ctx.kube.update_organization_status(&org).await?;
    Ok(outcome.action())
}

async fn converge(
    ctx: &Context,
    org: &PangolinOrganization,
    status: &mut PangolinOrganizationStatus,
) -> Result<Outcome, Error> {
    let control_plane = ctx.connect(org).await?;
    let orgs = control_plane.list_organizations().await?;

    let configured = org.spec.organization_id.as_deref().filter(|id| !id.is_empty());
    let (remote, mode) = match configured {
        Some(id) => {
            let found = orgs.into_iter().find(|o| o.org_id == id).ok_or_else(|| {
                Error::validation_for(
                    object_ref(org),
                    format!("organization {id} not found in control plane"),
                )
            })?;
            (found, BindingMode::Bound)
        }
        None => {
            let first = orgs.into_iter().next().ok_or_else(|| {
                Error::validation_for(object_ref(org), "control plane returned no organizations")
            })?;
            (first, BindingMode::Discovered)
        }
    };

    status.organization_id = Some(remote.org_id.clone());
    status.organization_name = Some(remote.name);
    status.subnet = remote.subnet;
    status.binding_mode = Some(mode);

    let domains = control_plane.list_domains(&remote.org_id).await?;
    status.domains = domains.into_iter().map(inventory_entry).collect();

    let selector = org
        .spec
        .defaults
        .as_ref()
        .and_then(|d| d.default_domain.as_deref());
    if let Some(default) = resolve_default_domain(selector, &status.domains) {
        status.default_domain_id = Some(default);
    }

    info!(
        organization = %org.name_any(),
        organization_id = %remote.org_id,
        mode = %mode,
        domains = status.domains.len(),
        default_domain = status.default_domain_id.as_deref().unwrap_or(""),
        "organization resolved"
    );

    Ok(Outcome::ready(format!(
        "organization {} resolved with {} domains",
        remote.org_id,
        status.domains.len()
    )))
}

fn inventory_entry(domain: Domain) -> OrganizationDomain {
    OrganizationDomain {
        domain_id: domain.domain_id,
        base_domain: domain.base_domain,
        verified: domain.verified,
        type_: domain.type_,
        failed: domain.failed,
        tries: domain.tries,
        config_managed: domain.config_managed,
    }
}
