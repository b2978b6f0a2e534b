//! In-memory fakes for multi-kind reconcile scenarios
//!
//! `FakeStore` behaves like the API server for the handful of operations
//! the reconcilers use: every write bumps `resourceVersion`, a write based on
//! a stale version is rejected with a 409, status writes replace the whole
//! status, and finalizer removal on a deleting object deletes it.
//! `FakeControlPlane` hands out sequential ids and counts calls per
//! operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service, ServiceSpec};
use k8s_openapi::ByteString;
use kube::ResourceExt;
use parking_lot::Mutex;

use pangolin_client::{
    CreateResourceRequest, CreateTargetRequest, Domain, Organization, Resource, Site, Target,
};
use pangolin_common::crd::{
    BindingMode, Condition, ConditionStatus, LocalObjectReference, OrganizationDomain,
    PangolinBinding, PangolinBindingSpec, PangolinOrganization, PangolinOrganizationSpec,
    PangolinOrganizationStatus, PangolinResource, PangolinResourceSpec, PangolinTunnel,
    PangolinTunnelSpec, ReconcilePhase, SecretKeyRef, BINDING_FINALIZER, ORGANIZATION_FINALIZER,
    RESOURCE_FINALIZER, TUNNEL_FINALIZER,
};
use pangolin_common::condition::READY_CONDITION;
use pangolin_common::Error;

use crate::context::{Context, ControlPlane, ControlPlaneFactory, KubeClient};
use crate::lifecycle::{Action, ObjectKey};
use crate::registry::ResourceKind;
use crate::{binding, organization, resource, tunnel};

/// Namespace every fixture lives in
pub(crate) const NS: &str = "net";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn object_key<K: kube::Resource>(obj: &K) -> Key {
    key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

/// In-memory stand-in for the API server
#[derive(Default)]
pub(crate) struct FakeStore {
    organizations: Mutex<BTreeMap<Key, PangolinOrganization>>,
    tunnels: Mutex<BTreeMap<Key, PangolinTunnel>>,
    resources: Mutex<BTreeMap<Key, PangolinResource>>,
    bindings: Mutex<BTreeMap<Key, PangolinBinding>>,
    secrets: Mutex<BTreeMap<Key, Secret>>,
    services: Mutex<BTreeMap<Key, Service>>,
    endpoints: Mutex<BTreeMap<Key, Vec<String>>>,
    deployments: Mutex<BTreeMap<Key, Deployment>>,
    fail_endpoints: Mutex<bool>,
    failing_secret_applies: Mutex<u32>,
    write_after_next_read: Mutex<bool>,
    revision: Mutex<u64>,
}

impl FakeStore {
    fn next_revision(&self) -> String {
        let mut revision = self.revision.lock();
        *revision += 1;
        revision.to_string()
    }

    fn put<K: kube::Resource>(&self, map: &Mutex<BTreeMap<Key, K>>, mut obj: K) {
        obj.meta_mut().resource_version = Some(self.next_revision());
        map.lock().insert(object_key(&obj), obj);
    }

    /// Read an object; a pending concurrent write lands right after it
    fn read<K: kube::Resource + Clone>(
        &self,
        map: &Mutex<BTreeMap<Key, K>>,
        namespace: &str,
        name: &str,
    ) -> Option<K> {
        let k = key(namespace, name);
        let found = map.lock().get(&k).cloned();
        if found.is_some() && std::mem::take(&mut *self.write_after_next_read.lock()) {
            let revision = self.next_revision();
            if let Some(stored) = map.lock().get_mut(&k) {
                stored.meta_mut().resource_version = Some(revision);
            }
        }
        found
    }

    /// Replace an object's status, guarded by its resourceVersion
    fn replace_status<K: kube::Resource>(
        &self,
        map: &Mutex<BTreeMap<Key, K>>,
        obj: &K,
        set_status: impl FnOnce(&mut K),
    ) -> Result<(), Error> {
        let (namespace, name) = object_key(obj);
        let revision = self.next_revision();
        let mut map = map.lock();
        let stored = map
            .get_mut(&key(&namespace, &name))
            .ok_or_else(|| not_found("object", &namespace, &name))?;
        if stored.meta().resource_version != obj.meta().resource_version {
            return Err(conflict(&namespace, &name));
        }
        set_status(stored);
        stored.meta_mut().resource_version = Some(revision);
        Ok(())
    }

    /// Replace the finalizer list; a deleting object with none left is removed
    fn finalize<K: kube::Resource>(
        &self,
        map: &Mutex<BTreeMap<Key, K>>,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
        resource_version: Option<String>,
    ) -> Result<(), Error> {
        let revision = self.next_revision();
        let mut map = map.lock();
        let k = key(namespace, name);
        let obj = map
            .get_mut(&k)
            .ok_or_else(|| not_found("object", namespace, name))?;
        if resource_version.is_some() && obj.meta().resource_version != resource_version {
            return Err(conflict(namespace, name));
        }
        let deleting = obj.meta().deletion_timestamp.is_some();
        obj.meta_mut().finalizers = Some(finalizers.clone());
        obj.meta_mut().resource_version = Some(revision);
        if deleting && finalizers.is_empty() {
            map.remove(&k);
        }
        Ok(())
    }

    pub(crate) fn put_organization(&self, org: PangolinOrganization) {
        self.put(&self.organizations, org);
    }

    pub(crate) fn put_tunnel(&self, tunnel: PangolinTunnel) {
        self.put(&self.tunnels, tunnel);
    }

    pub(crate) fn put_resource(&self, resource: PangolinResource) {
        self.put(&self.resources, resource);
    }

    pub(crate) fn put_binding(&self, binding: PangolinBinding) {
        self.put(&self.bindings, binding);
    }

    pub(crate) fn put_secret(&self, name: &str, data: &[(&str, &str)]) {
        let secret = Secret {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        };
        self.secrets.lock().insert(key(NS, name), secret);
    }

    pub(crate) fn put_service(&self, name: &str, cluster_ip: &str) {
        let service = Service {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some(cluster_ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.services.lock().insert(key(NS, name), service);
    }

    pub(crate) fn put_endpoints(&self, service: &str, addresses: &[&str]) {
        self.endpoints.lock().insert(
            key(NS, service),
            addresses.iter().map(|a| a.to_string()).collect(),
        );
    }

    pub(crate) fn fail_endpoint_listing(&self) {
        *self.fail_endpoints.lock() = true;
    }

    /// Make the next `times` Secret applies fail
    pub(crate) fn fail_secret_applies(&self, times: u32) {
        *self.failing_secret_applies.lock() = times;
    }

    /// Simulate another writer updating the object right after the next read
    pub(crate) fn write_after_next_read(&self) {
        *self.write_after_next_read.lock() = true;
    }

    pub(crate) fn organization(&self, name: &str) -> PangolinOrganization {
        self.organizations.lock()[&key(NS, name)].clone()
    }

    pub(crate) fn tunnel(&self, name: &str) -> PangolinTunnel {
        self.tunnels.lock()[&key(NS, name)].clone()
    }

    pub(crate) fn resource(&self, name: &str) -> PangolinResource {
        self.resources.lock()[&key(NS, name)].clone()
    }

    pub(crate) fn try_resource(&self, name: &str) -> Option<PangolinResource> {
        self.resources.lock().get(&key(NS, name)).cloned()
    }

    pub(crate) fn binding(&self, name: &str) -> PangolinBinding {
        self.bindings.lock()[&key(NS, name)].clone()
    }

    pub(crate) fn has_tunnel(&self, name: &str) -> bool {
        self.tunnels.lock().contains_key(&key(NS, name))
    }

    pub(crate) fn has_deployment(&self, name: &str) -> bool {
        self.deployments.lock().contains_key(&key(NS, name))
    }

    pub(crate) fn secret_value(&self, name: &str, data_key: &str) -> Option<String> {
        let secrets = self.secrets.lock();
        let secret = secrets.get(&key(NS, name))?;
        if let Some(v) = secret.string_data.as_ref().and_then(|d| d.get(data_key)) {
            return Some(v.clone());
        }
        secret
            .data
            .as_ref()
            .and_then(|d| d.get(data_key))
            .map(|b| String::from_utf8_lossy(&b.0).into_owned())
    }
}

fn not_found(kind: &str, namespace: &str, name: &str) -> Error {
    Error::internal("fake-store", format!("{kind} {namespace}/{name} not found"))
}

fn conflict(namespace: &str, name: &str) -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("the object {namespace}/{name} has been modified"),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}

#[async_trait]
impl KubeClient for FakeStore {
    async fn get_organization(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinOrganization>, Error> {
        Ok(self.read(&self.organizations, namespace, name))
    }

    async fn get_tunnel(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinTunnel>, Error> {
        Ok(self.read(&self.tunnels, namespace, name))
    }

    async fn get_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinResource>, Error> {
        Ok(self.read(&self.resources, namespace, name))
    }

    async fn get_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PangolinBinding>, Error> {
        Ok(self.read(&self.bindings, namespace, name))
    }

    async fn get_secret_value(
        &self,
        namespace: &str,
        name: &str,
        data_key: &str,
    ) -> Result<Option<String>, Error> {
        if namespace != NS {
            return Ok(None);
        }
        Ok(self.secret_value(name, data_key))
    }

    async fn secret_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        Ok(self.secrets.lock().contains_key(&key(namespace, name)))
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        Ok(self.services.lock().get(&key(namespace, name)).cloned())
    }

    async fn list_endpoint_addresses(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Vec<String>, Error> {
        if *self.fail_endpoints.lock() {
            return Err(Error::internal("fake-store", "endpoint listing unavailable"));
        }
        Ok(self
            .endpoints
            .lock()
            .get(&key(namespace, service))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_resource(&self, resource: &PangolinResource) -> Result<(), Error> {
        let k = object_key(resource);
        let mut resources = self.resources.lock();
        if resources.contains_key(&k) {
            return Err(Error::internal(
                "fake-store",
                format!("resource {}/{} already exists", k.0, k.1),
            ));
        }
        let mut created = resource.clone();
        created.metadata.uid = Some(format!("uid-{}", k.1));
        created.metadata.generation = Some(1);
        created.metadata.resource_version = Some(self.next_revision());
        resources.insert(k, created);
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
        let rv = resource_version;
        match kind {
            ResourceKind::Organization => {
                self.finalize(&self.organizations, namespace, name, finalizers, rv)
            }
            ResourceKind::Tunnel => self.finalize(&self.tunnels, namespace, name, finalizers, rv),
            ResourceKind::Resource => {
                self.finalize(&self.resources, namespace, name, finalizers, rv)
            }
            ResourceKind::Binding => self.finalize(&self.bindings, namespace, name, finalizers, rv),
        }
    }

    async fn update_organization_status(&self, org: &PangolinOrganization) -> Result<(), Error> {
        self.replace_status(&self.organizations, org, |stored| {
            stored.status = org.status.clone()
        })
    }

    async fn update_tunnel_status(&self, tunnel: &PangolinTunnel) -> Result<(), Error> {
        self.replace_status(&self.tunnels, tunnel, |stored| {
            stored.status = tunnel.status.clone()
        })
    }

    async fn update_resource_status(&self, resource: &PangolinResource) -> Result<(), Error> {
        self.replace_status(&self.resources, resource, |stored| {
            stored.status = resource.status.clone()
        })
    }

    async fn update_binding_status(&self, binding: &PangolinBinding) -> Result<(), Error> {
        self.replace_status(&self.bindings, binding, |stored| {
            stored.status = binding.status.clone()
        })
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        {
            let mut failing = self.failing_secret_applies.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(Error::internal("fake-store", "secret apply rejected"));
            }
        }
        self.secrets.lock().insert(object_key(secret), secret.clone());
        Ok(())
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<Option<i32>, Error> {
        let replicas = deployment.spec.as_ref().and_then(|s| s.replicas);
        self.deployments
            .lock()
            .insert(object_key(deployment), deployment.clone());
        Ok(replicas)
    }
}

/// Control plane fake with sequential ids and per-operation call counts
#[derive(Default)]
pub(crate) struct FakeControlPlane {
    orgs: Mutex<Vec<Organization>>,
    domains: Mutex<HashMap<String, Vec<Domain>>>,
    sites: Mutex<Vec<Site>>,
    resource_requests: Mutex<Vec<(String, i64, CreateResourceRequest)>>,
    target_requests: Mutex<Vec<(String, CreateTargetRequest)>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    next_id: Mutex<i64>,
}

impl FakeControlPlane {
    fn record(&self, op: &'static str) {
        *self.calls.lock().entry(op).or_default() += 1;
    }

    fn next_id(&self) -> i64 {
        let mut next = self.next_id.lock();
        *next += 1;
        100 + *next
    }

    pub(crate) fn add_organization(&self, org_id: &str, domains: Vec<Domain>) {
        self.orgs.lock().push(Organization {
            org_id: org_id.to_string(),
            name: org_id.to_uppercase(),
            subnet: None,
        });
        self.domains.lock().insert(org_id.to_string(), domains);
    }

    /// Replace the domain inventory the control plane reports for `org_id`
    pub(crate) fn set_domains(&self, org_id: &str, domains: Vec<Domain>) {
        self.domains.lock().insert(org_id.to_string(), domains);
    }

    pub(crate) fn add_site(&self, site_id: i64, nice_id: &str, site_type: &str) {
        self.sites.lock().push(Site {
            site_id,
            nice_id: Some(nice_id.to_string()),
            name: nice_id.to_string(),
            type_: Some(site_type.to_string()),
            online: true,
            ..Default::default()
        });
    }

    /// Number of calls made to `op`
    pub(crate) fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub(crate) fn resource_requests(&self) -> Vec<(String, i64, CreateResourceRequest)> {
        self.resource_requests.lock().clone()
    }

    pub(crate) fn target_requests(&self) -> Vec<(String, CreateTargetRequest)> {
        self.target_requests.lock().clone()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_organizations(&self) -> Result<Vec<Organization>, Error> {
        self.record("list_organizations");
        Ok(self.orgs.lock().clone())
    }

    async fn list_domains(&self, org_id: &str) -> Result<Vec<Domain>, Error> {
        self.record("list_domains");
        Ok(self.domains.lock().get(org_id).cloned().unwrap_or_default())
    }

    async fn get_site_by_id(&self, site_id: i64) -> Result<Site, Error> {
        self.record("get_site_by_id");
        self.sites
            .lock()
            .iter()
            .find(|s| s.site_id == site_id)
            .cloned()
            .ok_or_else(|| Error::control_plane("get-site", format!("site {site_id} not found")))
    }

    async fn get_site_by_nice_id(&self, _org_id: &str, nice_id: &str) -> Result<Site, Error> {
        self.record("get_site_by_nice_id");
        self.sites
            .lock()
            .iter()
            .find(|s| s.nice_id.as_deref() == Some(nice_id))
            .cloned()
            .ok_or_else(|| Error::control_plane("get-site", format!("site {nice_id} not found")))
    }

    async fn create_site(&self, _org_id: &str, name: &str, site_type: &str) -> Result<Site, Error> {
        self.record("create_site");
        let site_id = self.next_id();
        let newt = site_type == "newt";
        let site = Site {
            site_id,
            nice_id: Some(format!("site-{site_id}")),
            name: name.to_string(),
            type_: Some(site_type.to_string()),
            newt_id: newt.then(|| format!("newt-{site_id}")),
            newt_secret: newt.then(|| format!("secret-{site_id}")),
            ..Default::default()
        };
        self.sites.lock().push(site.clone());
        Ok(site)
    }

    async fn create_resource(
        &self,
        org_id: &str,
        site_id: i64,
        request: &CreateResourceRequest,
    ) -> Result<Resource, Error> {
        self.record("create_resource");
        self.resource_requests
            .lock()
            .push((org_id.to_string(), site_id, request.clone()));
        Ok(Resource {
            id: format!("res-{}", self.next_id()),
            name: request.name.clone(),
        })
    }

    async fn create_target(
        &self,
        resource_id: &str,
        request: &CreateTargetRequest,
    ) -> Result<Target, Error> {
        self.record("create_target");
        self.target_requests
            .lock()
            .push((resource_id.to_string(), request.clone()));
        Ok(Target {
            id: format!("tgt-{}", self.next_id()),
            ip: request.ip.clone(),
            port: request.port,
            method: request.method.clone(),
            enabled: request.enabled,
        })
    }
}

struct FakeFactory(Arc<FakeControlPlane>);

impl ControlPlaneFactory for FakeFactory {
    fn connect(&self, _endpoint: &str, _api_key: &str) -> Result<Arc<dyn ControlPlane>, Error> {
        Ok(self.0.clone())
    }
}

/// Store, control plane and context wired together
pub(crate) struct Harness {
    pub(crate) store: Arc<FakeStore>,
    pub(crate) control_plane: Arc<FakeControlPlane>,
    pub(crate) ctx: Arc<Context>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let store = Arc::new(FakeStore::default());
        store.put_secret("pangolin-api", &[("token", "k3y")]);
        let control_plane = Arc::new(FakeControlPlane::default());
        let ctx = Arc::new(Context::for_testing(
            store.clone(),
            Arc::new(FakeFactory(control_plane.clone())),
        ));
        Self {
            store,
            control_plane,
            ctx,
        }
    }

    /// Tunnel fixture already carrying its finalizer
    pub(crate) fn tunnel(&self, name: &str, spec: PangolinTunnelSpec) -> PangolinTunnel {
        let mut t = PangolinTunnel::new(name, spec);
        prepare(&mut t.metadata, name, TUNNEL_FINALIZER);
        t
    }

    /// Resource fixture already carrying its finalizer
    pub(crate) fn resource(&self, name: &str, spec: PangolinResourceSpec) -> PangolinResource {
        let mut r = PangolinResource::new(name, spec);
        prepare(&mut r.metadata, name, RESOURCE_FINALIZER);
        r
    }

    /// Binding fixture already carrying its finalizer
    pub(crate) fn binding(&self, name: &str, spec: PangolinBindingSpec) -> PangolinBinding {
        let mut b = PangolinBinding::new(name, spec);
        prepare(&mut b.metadata, name, BINDING_FINALIZER);
        b
    }

    pub(crate) async fn reconcile_organization(&self, name: &str) -> Action {
        organization::reconcile(ObjectKey::new(NS, name), self.ctx.clone())
            .await
            .unwrap()
    }

    pub(crate) async fn reconcile_tunnel(&self, name: &str) -> Action {
        tunnel::reconcile(ObjectKey::new(NS, name), self.ctx.clone())
            .await
            .unwrap()
    }

    pub(crate) async fn reconcile_resource(&self, name: &str) -> Action {
        resource::reconcile(ObjectKey::new(NS, name), self.ctx.clone())
            .await
            .unwrap()
    }

    pub(crate) async fn reconcile_binding(&self, name: &str) -> Action {
        binding::reconcile(ObjectKey::new(NS, name), self.ctx.clone())
            .await
            .unwrap()
    }
}

fn prepare(meta: &mut kube::api::ObjectMeta, name: &str, finalizer: &str) {
    meta.namespace = Some(NS.to_string());
    meta.uid = Some(format!("uid-{name}"));
    meta.generation = Some(1);
    meta.finalizers = Some(vec![finalizer.to_string()]);
}

fn ready_condition(ready: bool) -> Condition {
    Condition {
        type_: READY_CONDITION.to_string(),
        status: ConditionStatus::from(ready),
        reason: if ready { "ReconcileSuccess" } else { "DependencyNotReady" }.to_string(),
        message: String::new(),
        last_transition_time: Utc::now(),
        observed_generation: Some(1),
    }
}

/// Organization fixture with API key ref and endpoint, unreconciled
pub(crate) fn organization_spec(organization_id: Option<&str>) -> PangolinOrganizationSpec {
    PangolinOrganizationSpec {
        api_endpoint: "https://pangolin.example.com/api".to_string(),
        api_key_ref: SecretKeyRef {
            name: "pangolin-api".to_string(),
            key: "token".to_string(),
        },
        organization_id: organization_id.map(String::from),
        defaults: None,
    }
}

/// Organization `org1` with inventory `[d1 example.com]`, Ready or not
pub(crate) fn organization(name: &str, ready: bool) -> PangolinOrganization {
    let mut org = PangolinOrganization::new(name, organization_spec(Some("org1")));
    prepare(&mut org.metadata, name, ORGANIZATION_FINALIZER);
    org.status = Some(PangolinOrganizationStatus {
        organization_id: ready.then(|| "org1".to_string()),
        organization_name: Some("Org One".to_string()),
        binding_mode: Some(BindingMode::Bound),
        domains: vec![OrganizationDomain {
            domain_id: "d1".to_string(),
            base_domain: "example.com".to_string(),
            verified: true,
            ..Default::default()
        }],
        default_domain_id: Some("d1".to_string()),
        status: if ready {
            ReconcilePhase::Ready
        } else {
            ReconcilePhase::Waiting
        },
        conditions: vec![ready_condition(ready)],
        ..Default::default()
    });
    org
}

pub(crate) fn tunnel_spec(organization: &str) -> PangolinTunnelSpec {
    PangolinTunnelSpec {
        organization_ref: LocalObjectReference::new(organization),
        ..Default::default()
    }
}

/// Mark an object's status Ready regardless of its kind's own fields
pub(crate) fn mark_tunnel_ready(tunnel: &mut PangolinTunnel, site_id: i64) {
    let status = tunnel.status.get_or_insert_with(Default::default);
    status.site_id = Some(site_id);
    status.binding_mode = Some(BindingMode::Created);
    status.status = ReconcilePhase::Ready;
    status.conditions = vec![ready_condition(true)];
}

/// Mark a tunnel fixture Waiting with no site yet
pub(crate) fn mark_tunnel_waiting(tunnel: &mut PangolinTunnel) {
    let status = tunnel.status.get_or_insert_with(Default::default);
    status.status = ReconcilePhase::Waiting;
    status.conditions = vec![ready_condition(false)];
}

/// Control-plane inventory for `org1`
pub(crate) fn example_domains() -> Vec<Domain> {
    vec![Domain {
        domain_id: "d1".to_string(),
        base_domain: "example.com".to_string(),
        verified: true,
        ..Default::default()
    }]
}

mod scenarios {
    use super::*;

    /// Story: the full chain converges in dependency order. Organization binds
    /// to `org1`, the tunnel creates site `s1`, and an HTTP resource with only a
    /// subdomain lands on the organization's default domain.
    #[tokio::test]
    async fn story_organization_tunnel_resource_chain() {
        use pangolin_common::crd::{HttpConfig, Protocol, TargetConfig};

        let h = Harness::new();
        h.control_plane.add_organization("org1", example_domains());

        let mut org = PangolinOrganization::new("acme", organization_spec(Some("org1")));
        prepare(&mut org.metadata, "acme", ORGANIZATION_FINALIZER);
        h.store.put_organization(org);

        let mut spec = tunnel_spec("acme");
        spec.site_name = Some("s1".to_string());
        spec.site_type = Some("newt".to_string());
        h.store.put_tunnel(h.tunnel("edge", spec));

        h.store.put_resource(h.resource(
            "app",
            PangolinResourceSpec {
                tunnel_ref: LocalObjectReference::new("edge"),
                protocol: Protocol::Http,
                http_config: Some(HttpConfig {
                    subdomain: "app".to_string(),
                    ..Default::default()
                }),
                target: TargetConfig {
                    ip: "10.0.0.10".to_string(),
                    port: 8080,
                    method: None,
                    enabled: true,
                },
                ..Default::default()
            },
        ));

        // dependents wait until their dependency's status lands
        h.reconcile_resource("app").await;
        assert_eq!(
            h.store.resource("app").status.unwrap().status,
            ReconcilePhase::Waiting
        );
        h.reconcile_tunnel("edge").await;
        assert_eq!(
            h.store.tunnel("edge").status.unwrap().status,
            ReconcilePhase::Waiting
        );

        h.reconcile_organization("acme").await;
        let org = h.store.organization("acme").status.unwrap();
        assert_eq!(org.organization_id.as_deref(), Some("org1"));
        assert_eq!(org.default_domain_id.as_deref(), Some("d1"));

        h.reconcile_tunnel("edge").await;
        let tunnel = h.store.tunnel("edge").status.unwrap();
        assert_eq!(tunnel.status, ReconcilePhase::Ready);
        assert_eq!(tunnel.site_name.as_deref(), Some("s1"));
        assert_eq!(tunnel.site_type.as_deref(), Some("newt"));

        let action = h.reconcile_resource("app").await;
        assert_eq!(action, Action::await_change());
        let resource = h.store.resource("app").status.unwrap();
        assert_eq!(resource.status, ReconcilePhase::Ready);
        assert_eq!(resource.full_domain.as_deref(), Some("app.example.com"));
        assert_eq!(resource.url.as_deref(), Some("https://app.example.com"));

        let requests = h.control_plane.resource_requests();
        assert_eq!(requests.len(), 1);
        let (org_id, site_id, request) = &requests[0];
        assert_eq!(org_id, "org1");
        assert_eq!(Some(*site_id), tunnel.site_id);
        assert_eq!(request.protocol, "tcp");
        assert!(request.http);
        assert_eq!(request.domain_id.as_deref(), Some("d1"));

        // every further pass is a no-op against the control plane
        h.reconcile_organization("acme").await;
        h.reconcile_tunnel("edge").await;
        h.reconcile_resource("app").await;
        assert_eq!(h.control_plane.calls("create_site"), 1);
        assert_eq!(h.control_plane.calls("create_resource"), 1);
        assert_eq!(h.control_plane.calls("create_target"), 1);
    }

    /// Story: deleting a tunnel runs through its finalizer and the object is
    /// gone afterwards; the remote site is left alone
    #[tokio::test]
    async fn story_deleting_tunnel_releases_finalizer() {
        let h = Harness::new();
        h.store.put_organization(organization("acme", true));
        h.store.put_tunnel(h.tunnel("edge", tunnel_spec("acme")));
        h.reconcile_tunnel("edge").await;

        let mut tunnel = h.store.tunnel("edge");
        tunnel.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now()),
        );
        h.store.put_tunnel(tunnel);

        let action = h.reconcile_tunnel("edge").await;
        assert_eq!(action, Action::await_change());
        assert!(!h.store.has_tunnel("edge"));
        assert_eq!(h.control_plane.calls("create_site"), 1);
    }

    /// Story: a domain inventory that empties out replaces the cached one in
    /// full instead of leaving the old entries behind
    #[tokio::test]
    async fn story_emptied_domain_inventory_is_not_kept() {
        let h = Harness::new();
        h.control_plane.add_organization("org1", example_domains());
        let mut org = PangolinOrganization::new("acme", organization_spec(Some("org1")));
        prepare(&mut org.metadata, "acme", ORGANIZATION_FINALIZER);
        h.store.put_organization(org);

        h.reconcile_organization("acme").await;
        assert_eq!(h.store.organization("acme").status.unwrap().domains.len(), 1);

        h.control_plane.set_domains("org1", Vec::new());
        h.reconcile_organization("acme").await;

        let status = h.store.organization("acme").status.unwrap();
        assert_eq!(status.status, ReconcilePhase::Ready);
        assert!(status.domains.is_empty());
    }

    /// Story: a status write based on a stale read is rejected with a
    /// conflict, escapes reconcile untouched, and the runner requeues it;
    /// the retry then lands on the fresh object
    #[tokio::test]
    async fn story_stale_status_write_is_rejected_and_requeued() {
        let h = Harness::new();
        h.control_plane.add_organization("org1", example_domains());
        let mut org = PangolinOrganization::new("acme", organization_spec(Some("org1")));
        prepare(&mut org.metadata, "acme", ORGANIZATION_FINALIZER);
        h.store.put_organization(org);

        h.store.write_after_next_read();
        let key = ObjectKey::new(NS, "acme");
        let err = organization::reconcile(key.clone(), h.ctx.clone())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(h.store.organization("acme").status.is_none());

        let action = crate::runner::error_policy(ResourceKind::Organization, &key, &err);
        assert_eq!(
            action.requeue_after(),
            Some(std::time::Duration::from_secs(60))
        );

        h.reconcile_organization("acme").await;
        assert_eq!(
            h.store.organization("acme").status.unwrap().status,
            ReconcilePhase::Ready
        );
    }
}
