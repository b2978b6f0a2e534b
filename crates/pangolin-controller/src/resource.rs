//! PangolinResource reconciler
//!
//! Publishes a backend through a tunnel's site: an HTTP resource on a
//! resolved domain, or a raw TCP/UDP proxy port. The remote resource and its
//! target are each created at most once; their ids in status are the guard.
//! The hostname an HTTP resource was created on is kept in status and the
//! URL is always published from it, whatever the organization's domains
//! look like later.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use pangolin_client::{endpoint_host, CreateResourceRequest, CreateTargetRequest};
use pangolin_common::crd::{
    BindingMode, HttpConfig, PangolinOrganization, PangolinResource, PangolinResourceStatus,
    Protocol, ProxyConfig, RESOURCE_FINALIZER,
};
use pangolin_common::domain::{resolve_domain, ResolvedDomain};
use pangolin_common::kube_utils::object_ref;
use pangolin_common::Error;

use crate::context::Context;
use crate::lifecycle::{
    finalizer_gate, organization_gate, tunnel_gate, Action, Gate, ObjectKey, Outcome,
    OutcomeStatus,
};
use crate::registry::ResourceKind;

/// Reconcile a PangolinResource
#[instrument(skip(ctx), fields(resource = %key))]
pub async fn reconcile(key: ObjectKey, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(mut resource) = ctx.kube.get_resource(&key.namespace, &key.name).await? else {
        debug!("resource not found, assuming deleted");
        return Ok(Action::await_change());
    };

    if let Some(action) = finalizer_gate(
        ctx.kube.as_ref(),
        ResourceKind::Resource,
        &resource,
        RESOURCE_FINALIZER,
    )
    .await?
    {
        return Ok(action);
    }

    let mut status = resource.status.clone().unwrap_or_default();
    let outcome = match converge(&ctx, &resource, &mut status).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "resource reconcile failed");
            Outcome::error(&e)
        }
    };

    status.record(&outcome, resource.metadata.generation);
    resource.status = Some(status);
    ctx.kube.update_resource_status(&resource).await?;
    Ok(outcome.action())
}

async fn converge(
    ctx: &Context,
    resource: &PangolinResource,
    status: &mut PangolinResourceStatus,
) -> Result<Outcome, Error> {
    resource
        .spec
        .validate()
        .map_err(|msg| Error::validation_for(object_ref(resource), msg))?;

    let tunnel_name = &resource.spec.tunnel_ref.name;
    let (tunnel, site_id) = match tunnel_gate(ctx.kube.as_ref(), resource, tunnel_name).await? {
        Gate::Open(found) => found,
        Gate::Closed(outcome) => return Ok(outcome),
    };
    let org_name = &tunnel.spec.organization_ref.name;
    let (org, org_id) = match organization_gate(ctx.kube.as_ref(), resource, org_name).await? {
        Gate::Open(found) => found,
        Gate::Closed(outcome) => return Ok(outcome),
    };

    check_binding_mode(resource, status)?;

    let protocol = resource.spec.protocol;
    let http = resource
        .spec
        .http_config
        .as_ref()
        .filter(|_| protocol.is_http());
    let resolve = |http: &HttpConfig| -> Result<ResolvedDomain, Error> {
        resolve_domain(http, org.domains(), org.default_domain_id())
            .map_err(|e| for_object(resource, e))
    };

    let control_plane = ctx.connect(&org).await?;

    let bound_id = resource
        .spec
        .resource_id
        .clone()
        .filter(|id| !id.is_empty());
    if let Some(id) = bound_id {
        if status.resource_id.as_deref() != Some(id.as_str()) {
            // rebinding to another remote resource invalidates its target and hostname
            status.target_id = None;
            status.full_domain = None;
        }
        status.resource_id = Some(id);
        status.binding_mode = Some(BindingMode::Bound);
    } else if status.resource_id.is_none() {
        let name = resource
            .spec
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| resource.name_any());
        let (request, domain) = match (http, resource.spec.proxy_config.as_ref()) {
            (Some(http), _) => {
                let domain = resolve(http)?;
                let request =
                    CreateResourceRequest::http(name, site_id, &http.subdomain, &domain.domain_id);
                (request, Some(domain))
            }
            (None, Some(proxy)) => {
                let request = CreateResourceRequest::proxy(
                    name,
                    site_id,
                    protocol.as_str(),
                    proxy.proxy_port,
                    proxy.enable_proxy,
                );
                (request, None)
            }
            (None, None) => {
                return Err(Error::internal(
                    "resource",
                    "no protocol configuration to create from",
                ))
            }
        };

        let created = control_plane
            .create_resource(&org_id, site_id, &request)
            .await?;
        info!(resource_id = %created.id, site_id, protocol = %protocol, "resource created");
        status.resource_id = Some(created.id);
        status.binding_mode = Some(BindingMode::Created);
        status.full_domain = domain.map(|d| d.full_hostname);
    } else {
        debug!(resource_id = ?status.resource_id, "resource already created");
    }

    // an existing resource with no recorded hostname gets one on a best-effort basis
    if let (Some(http), None) = (http, status.full_domain.as_ref()) {
        match resolve(http) {
            Ok(domain) => status.full_domain = Some(domain.full_hostname),
            Err(e) => warn!(error = %e, "no hostname to publish for existing resource"),
        }
    }

    let resource_id = status
        .resource_id
        .clone()
        .ok_or_else(|| Error::internal("resource", "resource resolution left no id"))?;

    if status.target_id.is_none() {
        let target = &resource.spec.target;
        let request = CreateTargetRequest {
            ip: target.ip.clone(),
            port: target.port,
            method: resource.spec.target_method(),
            enabled: target.enabled,
        };
        let created = control_plane.create_target(&resource_id, &request).await?;
        info!(target_id = %created.id, resource_id = %resource_id, "target created");
        status.target_id = Some(created.id);
    }

    publish(status, protocol, resource.spec.proxy_config.as_ref(), &org);

    let address = status
        .url
        .clone()
        .or_else(|| status.proxy_endpoint.clone())
        .unwrap_or_default();
    Ok(Outcome::ready(format!("resource {resource_id} published at {address}")))
}

/// Write the public address: a URL on the recorded hostname for HTTP, a
/// proxy endpoint otherwise
fn publish(
    status: &mut PangolinResourceStatus,
    protocol: Protocol,
    proxy: Option<&ProxyConfig>,
    org: &PangolinOrganization,
) {
    if protocol.is_http() {
        status.url = status.full_domain.as_ref().map(|d| format!("https://{d}"));
        status.proxy_endpoint = None;
    } else if let Some(proxy) = proxy {
        let endpoint = &org.spec.api_endpoint;
        let host = endpoint_host(endpoint).unwrap_or_else(|| endpoint.clone());
        status.proxy_endpoint = Some(format!("{protocol}://{host}:{}", proxy.proxy_port));
        status.url = None;
        status.full_domain = None;
    }
}

/// A resource's binding mode is fixed once status records an id under it
fn check_binding_mode(
    resource: &PangolinResource,
    status: &PangolinResourceStatus,
) -> Result<(), Error> {
    let binds = resource
        .spec
        .resource_id
        .as_deref()
        .is_some_and(|id| !id.is_empty());
    match (binds, status.binding_mode, status.resource_id.as_deref()) {
        (true, Some(BindingMode::Created), Some(id)) => Err(Error::validation_for(
            object_ref(resource),
            format!("resource {id} was created by this object; resourceId cannot be added afterwards"),
        )),
        (false, Some(BindingMode::Bound), Some(id)) => Err(Error::validation_for(
            object_ref(resource),
            format!("bound to resource {id}; removing resourceId would create a new resource"),
        )),
        _ => Ok(()),
    }
}

/// Attach the object to validation errors raised without one
fn for_object(resource: &PangolinResource, err: Error) -> Error {
    match err {
        Error::Validation { message, .. } => Error::validation_for(object_ref(resource), message),
        other => other,
    }
}
