//! Typed controller registry
//!
//! An explicit map from kind to the `ApiResource` used to watch it and the
//! reconciler that converges it. Built once at startup; nothing registers
//! itself implicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::core::ApiResource;

use pangolin_common::crd::{PangolinBinding, PangolinOrganization, PangolinResource, PangolinTunnel};
use pangolin_common::Error;

use crate::context::Context;
use crate::lifecycle::{Action, ObjectKey};
use crate::{binding, organization, resource, tunnel};

/// The four reconciled kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// PangolinOrganization
    Organization,
    /// PangolinTunnel
    Tunnel,
    /// PangolinResource
    Resource,
    /// PangolinBinding
    Binding,
}

impl ResourceKind {
    /// All kinds, in dependency order
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Organization,
        ResourceKind::Tunnel,
        ResourceKind::Resource,
        ResourceKind::Binding,
    ];

    /// API resource for dynamic access to this kind
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::Organization => ApiResource::erase::<PangolinOrganization>(&()),
            Self::Tunnel => ApiResource::erase::<PangolinTunnel>(&()),
            Self::Resource => ApiResource::erase::<PangolinResource>(&()),
            Self::Binding => ApiResource::erase::<PangolinBinding>(&()),
        }
    }

    /// Kind matching an owner reference's `apiVersion` and `kind`
    pub fn from_owner(api_version: &str, kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| {
            let ar = k.api_resource();
            ar.api_version == api_version && ar.kind == kind
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Organization => "organization",
            Self::Tunnel => "tunnel",
            Self::Resource => "resource",
            Self::Binding => "binding",
        };
        f.write_str(s)
    }
}

/// Boxed reconcile future
pub type ReconcileFuture = BoxFuture<'static, Result<Action, Error>>;

/// Type-erased reconcile function
pub type ReconcileFn = Arc<dyn Fn(ObjectKey, Arc<Context>) -> ReconcileFuture + Send + Sync>;

/// A registered controller
#[derive(Clone)]
pub struct Registration {
    /// Kind being reconciled
    pub kind: ResourceKind,
    /// Used to watch the kind as `DynamicObject`s
    pub api_resource: ApiResource,
    /// Reconcile entry point
    pub reconcile: ReconcileFn,
}

/// Kind → controller map
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    registrations: BTreeMap<ResourceKind, Registration>,
}

impl ControllerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four Pangolin reconcilers
    pub fn pangolin() -> Self {
        Self::new()
            .register(ResourceKind::Organization, |key, ctx| {
                organization::reconcile(key, ctx).boxed()
            })
            .register(ResourceKind::Tunnel, |key, ctx| tunnel::reconcile(key, ctx).boxed())
            .register(ResourceKind::Resource, |key, ctx| {
                resource::reconcile(key, ctx).boxed()
            })
            .register(ResourceKind::Binding, |key, ctx| binding::reconcile(key, ctx).boxed())
    }

    /// Register (or replace) the reconciler for `kind`
    pub fn register<F>(mut self, kind: ResourceKind, reconcile: F) -> Self
    where
        F: Fn(ObjectKey, Arc<Context>) -> ReconcileFuture + Send + Sync + 'static,
    {
        self.registrations.insert(
            kind,
            Registration {
                kind,
                api_resource: kind.api_resource(),
                reconcile: Arc::new(reconcile),
            },
        );
        self
    }

    /// Registration for `kind`
    pub fn get(&self, kind: ResourceKind) -> Option<&Registration> {
        self.registrations.get(&kind)
    }

    /// Registered kinds in dependency order
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.registrations.keys().copied()
    }

    /// All registrations in dependency order
    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.values()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
