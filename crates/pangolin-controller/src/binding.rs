//! PangolinBinding reconciler
//!
//! Exposes a Service by generating a PangolinResource `<binding>-binding`
//! that targets the Service's cluster IP. The Binding is Ready once that
//! child is, and mirrors its public address.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use pangolin_common::crd::{
    LocalObjectReference, PangolinBinding, PangolinBindingStatus, PangolinResource,
    PangolinResourceSpec, TargetConfig, BINDING_FINALIZER,
};
use pangolin_common::kube_utils::{managed_labels, object_ref};
use pangolin_common::Error;

use crate::context::Context;
use crate::lifecycle::{
    finalizer_gate, organization_gate, tunnel_gate, Action, Gate, ObjectKey, Outcome,
    OutcomeStatus,
};
use crate::registry::ResourceKind;

/// Component label value on generated resources
const COMPONENT: &str = "binding";

/// Reconcile a PangolinBinding
#[instrument(skip(ctx), fields(binding = %key))]
pub async fn reconcile(key: ObjectKey, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(mut binding) = ctx.kube.get_binding(&key.namespace, &key.name).await? else {
        debug!("binding not found, assuming deleted");
        return Ok(Action::await_change());
    };

    if let Some(action) = finalizer_gate(
        ctx.kube.as_ref(),
        ResourceKind::Binding,
        &binding,
        BINDING_FINALIZER,
    )
    .await?
    {
        return Ok(action);
    }

    let mut status = binding.status.clone().unwrap_or_default();
    let outcome = match converge(&ctx, &binding, &mut status).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "binding reconcile failed");
            Outcome::error(&e)
        }
    };

    status.record(&outcome, binding.metadata.generation);
    binding.status = Some(status);
    ctx.kube.update_binding_status(&binding).await?;
    Ok(outcome.action())
}

async fn converge(
    ctx: &Context,
    binding: &PangolinBinding,
    status: &mut PangolinBindingStatus,
) -> Result<Outcome, Error> {
    let tunnel_name = binding
        .spec
        .tunnel_ref
        .as_ref()
        .map(|t| t.name.as_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            Error::validation_for(
                object_ref(binding),
                "tunnelRef is required; automatic tunnel creation is not supported",
            )
        })?;

    let service_namespace = binding.service_namespace();
    let service_name = &binding.spec.service_ref.name;
    let service = ctx
        .kube
        .get_service(&service_namespace, service_name)
        .await?
        .ok_or_else(|| {
            Error::validation_for(
                object_ref(binding),
                format!("service {service_namespace}/{service_name} not found"),
            )
        })?;

    let org_name = &binding.spec.organization_ref.name;
    if let Gate::Closed(outcome) = organization_gate(ctx.kube.as_ref(), binding, org_name).await? {
        return Ok(outcome);
    }
    if let Gate::Closed(outcome) = tunnel_gate(ctx.kube.as_ref(), binding, tunnel_name).await? {
        return Ok(outcome);
    }

    let cluster_ip = cluster_ip(&service).ok_or_else(|| {
        Error::validation_for(
            object_ref(binding),
            format!("service {service_namespace}/{service_name} has no cluster IP"),
        )
    })?;

    let child_name = binding.generated_resource_name();
    status.generated_resource_name = Some(child_name.clone());

    let namespace = binding.namespace().unwrap_or_default();
    let Some(child) = ctx.kube.get_resource(&namespace, &child_name).await? else {
        let child = build_resource(binding, tunnel_name, &cluster_ip)?;
        child
            .spec
            .validate()
            .map_err(|msg| Error::validation_for(object_ref(binding), msg))?;
        ctx.kube.create_resource(&child).await?;
        info!(resource = %child_name, target = %format!("{cluster_ip}:{}", binding.spec.service_port), "generated resource created");
        return Ok(Outcome::waiting(format!(
            "resource {child_name} created, waiting for it to become Ready"
        )));
    };

    if !child.is_ready() {
        return Ok(Outcome::waiting(format!("resource {child_name} is not Ready")));
    }

    let child_status = child.status.unwrap_or_default();
    status.url = child_status.url;
    status.proxy_endpoint = child_status.proxy_endpoint;

    if binding.spec.auto_update_targets {
        match ctx
            .kube
            .list_endpoint_addresses(&service_namespace, service_name)
            .await
        {
            Ok(endpoints) => status.service_endpoints = endpoints,
            Err(e) => warn!(error = %e, service = %service_name, "failed to list service endpoints"),
        }
    }

    let address = status
        .url
        .clone()
        .or_else(|| status.proxy_endpoint.clone())
        .unwrap_or_default();
    Ok(Outcome::ready(format!("service {service_name} exposed at {address}")))
}

fn cluster_ip(service: &Service) -> Option<String> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.clone())
        .filter(|ip| !ip.is_empty() && ip != "None")
}

/// Child PangolinResource generated for a binding
fn build_resource(
    binding: &PangolinBinding,
    tunnel_name: &str,
    cluster_ip: &str,
) -> Result<PangolinResource, Error> {
    let owner = binding.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal(
            "binding",
            format!("binding {} has no uid for an owner reference", object_ref(binding)),
        )
    })?;
    let protocol = binding.spec.protocol;

    let mut resource = PangolinResource::new(
        &binding.generated_resource_name(),
        PangolinResourceSpec {
            tunnel_ref: LocalObjectReference::new(tunnel_name),
            name: Some(binding.generated_display_name()),
            protocol,
            resource_id: None,
            http_config: binding.spec.http_config.clone(),
            proxy_config: binding.spec.proxy_config.clone(),
            target: TargetConfig {
                ip: cluster_ip.to_string(),
                port: binding.spec.service_port,
                method: Some(protocol.default_target_method().to_string()),
                enabled: true,
            },
        },
    );
    resource.metadata.namespace = binding.namespace();
    resource.metadata.labels = Some(managed_labels(COMPONENT, &binding.name_any()));
    resource.metadata.owner_references = Some(vec![owner]);
    Ok(resource)
}
