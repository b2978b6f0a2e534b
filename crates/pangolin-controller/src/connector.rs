//! Newt connector workload for newt-type tunnels
//!
//! A Secret `<tunnel>-newt` carries the site's Newt credentials and the
//! control plane origin; a Deployment of the same name runs the connector
//! with its environment sourced from that Secret. Both are owned by the
//! tunnel so they are garbage collected with it.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Secret, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use pangolin_client::{endpoint_origin, Site};
use pangolin_common::crd::PangolinTunnel;
use pangolin_common::kube_utils::{managed_labels, object_ref, INSTANCE_LABEL, NAME_LABEL};
use pangolin_common::retry::{retry_with_backoff, RetryConfig};
use pangolin_common::Error;

use crate::context::KubeClient;

/// Component name used in labels and object names
const COMPONENT: &str = "newt";

/// Secret key holding the Newt client id
pub const NEWT_ID_KEY: &str = "NEWT_ID";
/// Secret key holding the Newt client secret
pub const NEWT_SECRET_KEY: &str = "NEWT_SECRET";
/// Secret key holding the control plane origin
pub const PANGOLIN_ENDPOINT_KEY: &str = "PANGOLIN_ENDPOINT";

/// Attempts at storing freshly issued credentials before they are lost
const CREDENTIAL_STORE_ATTEMPTS: u32 = 5;

/// Credentials returned by the control plane when a newt site is created
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewtCredentials {
    /// Newt client id
    pub newt_id: String,
    /// Newt client secret
    pub secret: String,
}

impl NewtCredentials {
    /// Credentials carried by a site response, if both halves are present
    pub fn from_site(site: &Site) -> Option<Self> {
        let newt_id = site.newt_id.clone().filter(|s| !s.is_empty())?;
        let secret = site.newt_secret.clone().filter(|s| !s.is_empty())?;
        Some(Self { newt_id, secret })
    }
}

/// What the connector step published
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectorState {
    /// Name of the credentials Secret
    pub secret_name: String,
    /// Ready replicas reported by the Deployment
    pub ready_replicas: Option<i32>,
}

/// Name shared by the connector Secret and Deployment
pub fn connector_name(tunnel: &PangolinTunnel) -> String {
    format!("{}-{COMPONENT}", tunnel.name_any())
}

fn owner_reference(tunnel: &PangolinTunnel) -> Result<OwnerReference, Error> {
    tunnel.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal(
            "connector",
            format!("tunnel {} has no uid for an owner reference", object_ref(tunnel)),
        )
    })
}

fn metadata(tunnel: &PangolinTunnel) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(connector_name(tunnel)),
        namespace: tunnel.namespace(),
        labels: Some(managed_labels(COMPONENT, &tunnel.name_any())),
        owner_references: Some(vec![owner_reference(tunnel)?]),
        ..Default::default()
    })
}

/// Build the credentials Secret
pub fn build_secret(
    tunnel: &PangolinTunnel,
    credentials: &NewtCredentials,
    api_endpoint: &str,
) -> Result<Secret, Error> {
    let endpoint = endpoint_origin(api_endpoint).unwrap_or_else(|| api_endpoint.to_string());
    Ok(Secret {
        metadata: metadata(tunnel)?,
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([
            (NEWT_ID_KEY.to_string(), credentials.newt_id.clone()),
            (NEWT_SECRET_KEY.to_string(), credentials.secret.clone()),
            (PANGOLIN_ENDPOINT_KEY.to_string(), endpoint),
        ])),
        ..Default::default()
    })
}

fn secret_env(secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: key.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: Some(false),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the connector Deployment
pub fn build_deployment(
    tunnel: &PangolinTunnel,
    default_image: &str,
    secret_name: &str,
) -> Result<Deployment, Error> {
    let newt = tunnel.spec.newt_client.as_ref();
    let replicas = newt.and_then(|n| n.replicas).unwrap_or(1);
    let image = newt
        .and_then(|n| n.image.clone())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| default_image.to_string());

    let labels = managed_labels(COMPONENT, &tunnel.name_any());
    let selector = BTreeMap::from([
        (NAME_LABEL.to_string(), COMPONENT.to_string()),
        (INSTANCE_LABEL.to_string(), tunnel.name_any()),
    ]);

    let container = Container {
        name: COMPONENT.to_string(),
        image: Some(image),
        env: Some(
            [NEWT_ID_KEY, NEWT_SECRET_KEY, PANGOLIN_ENDPOINT_KEY]
                .iter()
                .map(|key| secret_env(secret_name, key))
                .collect(),
        ),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: metadata(tunnel)?,
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Converge the Secret and Deployment for a newt tunnel.
///
/// Credentials are only returned when a site is created, so an existing
/// Secret is kept as-is when none are supplied. With neither, the connector
/// cannot start and the tunnel is in error. Supplied credentials cannot be
/// fetched again, so their Secret write is retried before giving up.
pub async fn ensure_newt(
    kube: &dyn KubeClient,
    tunnel: &PangolinTunnel,
    api_endpoint: &str,
    default_image: &str,
    credentials: Option<&NewtCredentials>,
) -> Result<ConnectorState, Error> {
    let namespace = tunnel.namespace().unwrap_or_default();
    let secret_name = connector_name(tunnel);

    if let Some(credentials) = credentials {
        let secret = build_secret(tunnel, credentials, api_endpoint)?;
        retry_with_backoff(
            &RetryConfig::with_max_attempts(CREDENTIAL_STORE_ATTEMPTS),
            "store-newt-credentials",
            || kube.apply_secret(&secret),
        )
        .await
        .map_err(|e| {
            Error::internal(
                "newt-credentials",
                format!(
                    "credentials for newt {} could not be stored in secret {namespace}/{secret_name} and cannot be fetched again; delete the site or provide the secret manually: {e}",
                    credentials.newt_id
                ),
            )
        })?;
        info!(secret = %secret_name, "newt credentials stored");
    } else if kube.secret_exists(&namespace, &secret_name).await? {
        debug!(secret = %secret_name, "reusing existing newt credentials");
    } else {
        return Err(Error::validation_for(
            object_ref(tunnel),
            format!(
                "no newt credentials available: the control plane returned none and secret {namespace}/{secret_name} does not exist"
            ),
        ));
    }

    let ready_replicas = kube
        .apply_deployment(&build_deployment(tunnel, default_image, &secret_name)?)
        .await?;

    Ok(ConnectorState {
        secret_name,
        ready_replicas,
    })
}
