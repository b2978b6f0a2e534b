//! PangolinTunnel reconciler
//!
//! A tunnel either binds to an existing site (`siteId` or `niceId`) or
//! creates one exactly once. Newt sites with `newtClient.enabled` also get a
//! managed connector Deployment.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use pangolin_client::Site;
use pangolin_common::crd::{BindingMode, PangolinTunnel, PangolinTunnelStatus, TUNNEL_FINALIZER};
use pangolin_common::kube_utils::object_ref;
use pangolin_common::{Error, NEWT_SITE_TYPE};

use crate::connector::{ensure_newt, NewtCredentials};
use crate::context::Context;
use crate::lifecycle::{
    finalizer_gate, organization_gate, Action, Gate, ObjectKey, Outcome, OutcomeStatus,
};
use crate::registry::ResourceKind;

/// Reconcile a PangolinTunnel
#[instrument(skip(ctx), fields(tunnel = %key))]
pub async fn reconcile(key: ObjectKey, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(mut tunnel) = ctx.kube.get_tunnel(&key.namespace, &key.name).await? else {
        debug!("tunnel not found, assuming deleted");
        return Ok(Action::await_change());
    };

    if let Some(action) =
        finalizer_gate(ctx.kube.as_ref(), ResourceKind::Tunnel, &tunnel, TUNNEL_FINALIZER).await?
    {
        return Ok(action);
    }

    let mut status = tunnel.status.clone().unwrap_or_default();
    let outcome = match converge(&ctx, &tunnel, &mut status).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "tunnel reconcile failed");
            Outcome::error(&e)
        }
    };

    status.record(&outcome, tunnel.metadata.generation);
    tunnel.status = Some(status);
    ctx.kube.update_tunnel_status(&tunnel).await?;
    Ok(outcome.action())
}

async fn converge(
    ctx: &Context,
    tunnel: &PangolinTunnel,
    status: &mut PangolinTunnelStatus,
) -> Result<Outcome, Error> {
    let org_name = &tunnel.spec.organization_ref.name;
    let (org, org_id) = match organization_gate(ctx.kube.as_ref(), tunnel, org_name).await? {
        Gate::Open(found) => found,
        Gate::Closed(outcome) => return Ok(outcome),
    };

    check_binding_mode(tunnel, status)?;

    let control_plane = ctx.connect(&org).await?;
    let credentials = if tunnel.spec.binds_existing_site() {
        let site = match (tunnel.spec.site_id, nice_id(tunnel)) {
            (Some(site_id), nice) => {
                if let Some(nice) = nice {
                    warn!(site_id, nice_id = %nice, "both siteId and niceId set, binding by siteId");
                }
                control_plane.get_site_by_id(site_id).await?
            }
            (None, Some(nice)) => control_plane.get_site_by_nice_id(&org_id, nice).await?,
            (None, None) => {
                return Err(Error::internal("tunnel", "bind requested without a site selector"))
            }
        };
        apply_site(status, &site);
        status.binding_mode = Some(BindingMode::Bound);
        debug!(site_id = site.site_id, "bound to existing site");
        NewtCredentials::from_site(&site)
    } else if status.site_id.is_none() {
        let name = tunnel
            .spec
            .site_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| tunnel.name_any());
        let site_type = tunnel
            .spec
            .site_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(org.default_site_type())
            .unwrap_or(NEWT_SITE_TYPE)
            .to_string();

        let site = control_plane.create_site(&org_id, &name, &site_type).await?;
        info!(site_id = site.site_id, site_name = %name, site_type = %site_type, "site created");
        status.site_type = Some(site_type);
        apply_site(status, &site);
        status.binding_mode = Some(BindingMode::Created);
        NewtCredentials::from_site(&site)
    } else {
        debug!(site_id = ?status.site_id, "site already created");
        None
    };

    let site_id = status
        .site_id
        .ok_or_else(|| Error::internal("tunnel", "site resolution left no site id"))?;

    let is_newt = status.site_type.as_deref() == Some(NEWT_SITE_TYPE);
    if is_newt && tunnel.spec.newt_enabled() {
        let connector = ensure_newt(
            ctx.kube.as_ref(),
            tunnel,
            &org.spec.api_endpoint,
            &ctx.newt_image,
            credentials.as_ref(),
        )
        .await?;
        status.newt_secret_ref = Some(connector.secret_name);
        status.ready_replicas = connector.ready_replicas;
    }

    let mode = status.binding_mode.map(|m| m.to_string()).unwrap_or_default();
    Ok(Outcome::ready(format!("site {site_id} {mode}")))
}

fn nice_id(tunnel: &PangolinTunnel) -> Option<&str> {
    tunnel.spec.nice_id.as_deref().filter(|n| !n.is_empty())
}

/// A tunnel's binding mode is fixed once status records a site under it
fn check_binding_mode(tunnel: &PangolinTunnel, status: &PangolinTunnelStatus) -> Result<(), Error> {
    let binds = tunnel.spec.binds_existing_site();
    match (binds, status.binding_mode, status.site_id) {
        (true, Some(BindingMode::Created), Some(site_id)) => Err(Error::validation_for(
            object_ref(tunnel),
            format!("site {site_id} was created by this tunnel; siteId/niceId cannot be added afterwards"),
        )),
        (false, Some(BindingMode::Bound), Some(site_id)) => Err(Error::validation_for(
            object_ref(tunnel),
            format!("tunnel is bound to site {site_id}; removing siteId/niceId would create a new site"),
        )),
        _ => Ok(()),
    }
}

fn apply_site(status: &mut PangolinTunnelStatus, site: &Site) {
    status.site_id = Some(site.site_id);
    status.nice_id = site.nice_id.clone();
    status.site_name = Some(site.name.clone()).filter(|n| !n.is_empty());
    if let Some(site_type) = site.type_.clone().filter(|t| !t.is_empty()) {
        status.site_type = Some(site_type);
    }
    status.subnet = site.subnet.clone();
    status.address = site.address.clone();
    status.online = site.online;
    status.endpoint = site.endpoint.clone();
}
