//! Controller context and the two seams reconcilers talk through
//!
//! [`KubeClient`] covers every read and write against the cluster and
//! [`ControlPlane`] every call to the Pangolin API. Both are traits so tests
//! can substitute mocks or in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use pangolin_client::{
    CreateResourceRequest, CreateTargetRequest, Domain, Organization, PangolinClient, Resource,
    Site, Target,
};
use pangolin_common::crd::{
    PangolinBinding, PangolinOrganization, PangolinResource, PangolinTunnel,
};
use pangolin_common::kube_utils::{finalizers_patch, object_ref};
use pangolin_common::{Error, DEFAULT_NEWT_IMAGE, FIELD_MANAGER};

use crate::registry::ResourceKind;

/// Label EndpointSlices carry to name their Service
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Cluster operations used by the reconcilers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a PangolinOrganization
    async fn get_organization(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinOrganization>, Error>;

    /// Get a PangolinTunnel
    async fn get_tunnel(&self, namespace: &str, name: &str)
        -> Result<Option<PangolinTunnel>, Error>;

    /// Get a PangolinResource
    async fn get_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinResource>, Error>;

    /// Get a PangolinBinding
    async fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinBinding>, Error>;

    /// Read one key of a Secret; `None` when the Secret or key is missing
    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error>;

    /// Whether a Secret exists
    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Get a Service
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Ready endpoint addresses of a Service as `ip:port`
    async fn list_endpoint_addresses(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<String>, Error>;

    /// Create a PangolinResource
    async fn create_resource(&self, resource: &PangolinResource) -> Result<(), Error>;

    /// Replace an object's finalizer list, guarded by resourceVersion
    async fn set_finalizers(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<(), Error>;

    /// Write an organization's status
    async fn update_organization_status(&self, org: &PangolinOrganization) -> Result<(), Error>;

    /// Write a tunnel's status
    async fn update_tunnel_status(&self, tunnel: &PangolinTunnel) -> Result<(), Error>;

    /// Write a resource's status
    async fn update_resource_status(&self, resource: &PangolinResource) -> Result<(), Error>;

    /// Write a binding's status
    async fn update_binding_status(&self, binding: &PangolinBinding) -> Result<(), Error>;

    /// Server-side apply a Secret
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Server-side apply a Deployment, returning its ready replica count
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Option<i32>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    /// Replace the status subresource with the object's whole status.
    ///
    /// A replace drops fields the new status no longer carries, and the
    /// object's `resourceVersion` makes the API server reject (409) a write
    /// based on a stale read.
    async fn replace_status<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
    {
        let namespace = obj.namespace().ok_or_else(|| {
            Error::internal("status", format!("{} has no namespace", obj.name_any()))
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(obj).map_err(|e| {
            Error::serialization(format!("status of {}: {e}", object_ref(obj)))
        })?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.replace_status(&obj.name_any(), &params, data).await?;
        debug!(object = %object_ref(obj), "status updated");
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_organization(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinOrganization>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_tunnel(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinTunnel>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinResource>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinBinding>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>, Error> {
        let Some(secret) = self.get_opt::<Secret>(namespace, name).await? else {
            return Ok(None);
        };
        let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) else {
            return Ok(None);
        };
        let value = String::from_utf8(bytes.0.clone()).map_err(|e| {
            Error::serialization(format!("secret {namespace}/{name} key {key} is not UTF-8: {e}"))
        })?;
        Ok(Some(value.trim().to_string()))
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        Ok(self.get_opt::<Secret>(namespace, name).await?.is_some())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn list_endpoint_addresses(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<String>, Error> {
        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), namespace);
        let slices = api
            .list(&ListParams::default().labels(&format!("{SERVICE_NAME_LABEL}={service}")))
            .await?;
        Ok(endpoint_addresses(&slices.items))
    }

    async fn create_resource(&self, resource: &PangolinResource) -> Result<(), Error> {
        let namespace = resource.namespace().unwrap_or_default();
        let api: Api<PangolinResource> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), resource).await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<(), Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource());
        let patch = finalizers_patch(&finalizers, resource_version.as_deref());
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn update_organization_status(&self, org: &PangolinOrganization) -> Result<(), Error> {
        self.replace_status(org).await
    }

    async fn update_tunnel_status(&self, tunnel: &PangolinTunnel) -> Result<(), Error> {
        self.replace_status(tunnel).await
    }

    async fn update_resource_status(&self, resource: &PangolinResource) -> Result<(), Error> {
        self.replace_status(resource).await
    }

    async fn update_binding_status(&self, binding: &PangolinBinding) -> Result<(), Error> {
        self.replace_status(binding).await
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret.namespace().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.patch(
            &secret.name_any(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(secret),
        )
        .await?;
        Ok(())
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Option<i32>, Error> {
        let namespace = deployment.namespace().unwrap_or_default();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let applied = api
            .patch(
                &deployment.name_any(),
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(deployment),
            )
            .await?;
        Ok(applied.status.and_then(|s| s.ready_replicas))
    }
}

/// Ready addresses across EndpointSlices as `ip:port` (bare ip when the
/// slice has no ports)
pub(crate) fn endpoint_addresses(slices: &[EndpointSlice]) -> Vec<String> {
    let mut out = Vec::new();
    for slice in slices {
        let ports: Vec<i32> = slice
            .ports
            .iter()
            .flatten()
            .filter_map(|p| p.port)
            .collect();
        for endpoint in &slice.endpoints {
            let ready = endpoint
                .conditions
                .as_ref()
                .and_then(|c| c.ready)
                .unwrap_or(true);
            if !ready {
                continue;
            }
            for ip in &endpoint.addresses {
                if ports.is_empty() {
                    out.push(ip.clone());
                } else {
                    out.extend(ports.iter().map(|port| format!("{ip}:{port}")));
                }
            }
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Calls against the Pangolin control plane
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Organizations visible to the key, in API order
    async fn list_organizations(&self) -> Result<Vec<Organization>, Error>;

    /// Domain inventory of an organization
    async fn list_domains(&self, org_id: &str) -> Result<Vec<Domain>, Error>;

    /// Site by numeric id
    async fn get_site_by_id(&self, site_id: i64) -> Result<Site, Error>;

    /// Site by nice id
    async fn get_site_by_nice_id(&self, org_id: &str, nice_id: &str) -> Result<Site, Error>;

    /// Create a site
    async fn create_site(&self, org_id: &str, name: &str, site_type: &str) -> Result<Site, Error>;

    /// Create a resource on a site
    async fn create_resource(
        &self,
        org_id: &str,
        site_id: i64,
        request: &CreateResourceRequest,
    ) -> Result<Resource, Error>;

    /// Create a forwarding target
    async fn create_target(
        &self,
        resource_id: &str,
        request: &CreateTargetRequest,
    ) -> Result<Target, Error>;
}

#[async_trait]
impl ControlPlane for PangolinClient {
    async fn list_organizations(&self) -> Result<Vec<Organization>, Error> {
        Ok(PangolinClient::list_organizations(self).await?)
    }

    async fn list_domains(&self, org_id: &str) -> Result<Vec<Domain>, Error> {
        Ok(PangolinClient::list_domains(self, org_id).await?)
    }

    async fn get_site_by_id(&self, site_id: i64) -> Result<Site, Error> {
        Ok(PangolinClient::get_site_by_id(self, site_id).await?)
    }

    async fn get_site_by_nice_id(&self, org_id: &str, nice_id: &str) -> Result<Site, Error> {
        Ok(PangolinClient::get_site_by_nice_id(self, org_id, nice_id).await?)
    }

    async fn create_site(&self, org_id: &str, name: &str, site_type: &str) -> Result<Site, Error> {
        Ok(PangolinClient::create_site(self, org_id, name, site_type).await?)
    }

    async fn create_resource(
        &self,
        org_id: &str,
        site_id: i64,
        request: &CreateResourceRequest,
    ) -> Result<Resource, Error> {
        Ok(PangolinClient::create_resource(self, org_id, site_id, request).await?)
    }

    async fn create_target(
        &self,
        resource_id: &str,
        request: &CreateTargetRequest,
    ) -> Result<Target, Error> {
        Ok(PangolinClient::create_target(self, resource_id, request).await?)
    }
}

/// Builds a [`ControlPlane`] for an organization's endpoint and key
#[cfg_attr(test, automock)]
pub trait ControlPlaneFactory: Send + Sync {
    /// Connect to `endpoint` with `api_key`
    fn connect(&self, endpoint: &str, api_key: &str) -> Result<Arc<dyn ControlPlane>, Error>;
}

/// Factory producing HTTP clients
#[derive(Clone, Copy, Debug, Default)]
pub struct PangolinControlPlaneFactory;

impl ControlPlaneFactory for PangolinControlPlaneFactory {
    fn connect(&self, endpoint: &str, api_key: &str) -> Result<Arc<dyn ControlPlane>, Error> {
        Ok(Arc::new(PangolinClient::new(endpoint, api_key)?))
    }
}

/// Shared state for all reconcilers
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Builds control plane clients per organization
    pub control_plane: Arc<dyn ControlPlaneFactory>,
    /// Default image for managed Newt deployments
    pub newt_image: String,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Context wired to the given seams
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        control_plane: Arc<dyn ControlPlaneFactory>,
    ) -> Self {
        Self {
            kube,
            control_plane,
            newt_image: DEFAULT_NEWT_IMAGE.to_string(),
        }
    }

    /// Control plane client for an organization, using its API key Secret
    pub async fn connect(
        &self,
        org: &PangolinOrganization,
    ) -> Result<Arc<dyn ControlPlane>, Error> {
        let namespace = org.namespace().unwrap_or_default();
        let key_ref = &org.spec.api_key_ref;
        let api_key = self
            .kube
            .get_secret_value(&namespace, &key_ref.name, &key_ref.key)
            .await?
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::validation_for(
                    object_ref(org),
                    format!(
                        "API key not found in secret {}/{} key {}",
                        namespace, key_ref.name, key_ref.key
                    ),
                )
            })?;
        self.control_plane.connect(&org.spec.api_endpoint, &api_key)
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    control_plane: Option<Arc<dyn ControlPlaneFactory>>,
    newt_image: Option<String>,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            control_plane: None,
            newt_image: None,
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the control plane factory
    pub fn control_plane(mut self, factory: Arc<dyn ControlPlaneFactory>) -> Self {
        self.control_plane = Some(factory);
        self
    }

    /// Image for managed Newt deployments
    pub fn newt_image(mut self, image: impl Into<String>) -> Self {
        self.newt_image = Some(image.into());
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            control_plane: self
                .control_plane
                .unwrap_or_else(|| Arc::new(PangolinControlPlaneFactory)),
            newt_image: self
                .newt_image
                .unwrap_or_else(|| DEFAULT_NEWT_IMAGE.to_string()),
        }
    }
}
