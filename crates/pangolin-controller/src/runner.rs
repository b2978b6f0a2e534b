//! Controller runner - watchers feed work queues, workers drain them
//!
//! One watcher per registered kind turns change events into object keys.
//! Generated children also wake their owner (a Resource change requeues its
//! Binding). Each kind gets its own [`WorkQueue`] and a pool of workers, so
//! the same object is never reconciled concurrently while different objects
//! are.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use pangolin_common::Error;

use crate::context::Context;
use crate::lifecycle::{recheck_interval, Action, ObjectKey};
use crate::queue::WorkQueue;
use crate::registry::{ControllerRegistry, Registration, ResourceKind};

/// Watcher timeout (seconds) - must be less than the client read timeout
/// (30s) so idle watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Default concurrent reconciles per kind
pub const DEFAULT_WORKERS: usize = 4;

/// Runner settings
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Watch only this namespace; all namespaces when `None`
    pub namespace: Option<String>,
    /// Workers per kind
    pub workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            workers: DEFAULT_WORKERS,
        }
    }
}

type Queues = Arc<BTreeMap<ResourceKind, Arc<WorkQueue<ObjectKey>>>>;

/// Drives every registered controller until shutdown
pub struct Runner {
    client: Client,
    ctx: Arc<Context>,
    registry: ControllerRegistry,
    config: RunnerConfig,
}

impl Runner {
    /// Create a runner
    pub fn new(
        client: Client,
        ctx: Arc<Context>,
        registry: ControllerRegistry,
        config: RunnerConfig,
    ) -> Self {
        Self {
            client,
            ctx,
            registry,
            config,
        }
    }

    /// Run watchers and workers until `shutdown` resolves.
    ///
    /// On shutdown the queues stop handing out keys and in-flight reconciles
    /// are abandoned; the next start picks them up again from the watch. A
    /// watcher or worker that stops on its own (a panicking reconcile) stops
    /// the runner with an error.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        if self.registry.is_empty() {
            return Err(Error::internal("runner", "no controllers registered"));
        }

        let queues: Queues = Arc::new(
            self.registry
                .kinds()
                .map(|kind| (kind, Arc::new(WorkQueue::new())))
                .collect(),
        );

        let workers = self.config.workers.max(1);
        let mut tasks = JoinSet::new();
        for registration in self.registry.iter() {
            info!(
                kind = %registration.kind,
                workers,
                namespace = self.config.namespace.as_deref().unwrap_or("*"),
                "starting controller"
            );

            tasks.spawn(watch(
                self.client.clone(),
                self.config.namespace.clone(),
                registration.clone(),
                queues.clone(),
            ));

            let queue = queues[&registration.kind].clone();
            for _ in 0..workers {
                tasks.spawn(work(registration.clone(), queue.clone(), self.ctx.clone()));
            }
        }

        let result = tokio::select! {
            _ = shutdown => {
                info!("shutdown requested, stopping controllers");
                Ok(())
            }
            Some(exit) = tasks.join_next() => Err(task_exit(exit)),
        };

        for queue in queues.values() {
            queue.shutdown();
        }
        tasks.shutdown().await;
        result
    }
}

/// Error for a watcher or worker that stopped before shutdown was requested
fn task_exit(exit: Result<(), JoinError>) -> Error {
    let message = match exit {
        Ok(()) => "controller task exited unexpectedly".to_string(),
        Err(e) => format!("controller task failed: {e}"),
    };
    error!(%message, "stopping controllers");
    Error::internal("runner", message)
}

/// Keys to enqueue for a watched object: its own, plus any owner whose kind
/// is reconciled here
pub fn route_event(kind: ResourceKind, obj: &DynamicObject) -> Vec<(ResourceKind, ObjectKey)> {
    let Some(key) = ObjectKey::from_object(obj) else {
        return Vec::new();
    };
    let mut routes = vec![(kind, key.clone())];
    for owner in obj.owner_references() {
        if let Some(owner_kind) = ResourceKind::from_owner(&owner.api_version, &owner.kind) {
            routes.push((owner_kind, ObjectKey::new(key.namespace.clone(), owner.name.clone())));
        }
    }
    routes
}

fn enqueue_routes(queues: &Queues, kind: ResourceKind, obj: &DynamicObject) {
    for (target, key) in route_event(kind, obj) {
        if let Some(queue) = queues.get(&target) {
            queue.enqueue(key);
        }
    }
}

async fn watch(
    client: Client,
    namespace: Option<String>,
    registration: Registration,
    queues: Queues,
) {
    let ar = &registration.api_resource;
    let api: Api<DynamicObject> = match namespace.as_deref() {
        Some(ns) => Api::namespaced_with(client, ns, ar),
        None => Api::all_with(client, ar),
    };

    let kind = registration.kind;
    let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
    let mut events = watcher::watcher(api, config).default_backoff().boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) | Ok(Event::Delete(obj)) => {
                enqueue_routes(&queues, kind, &obj);
            }
            Ok(Event::Init) | Ok(Event::InitDone) => {}
            Err(e) => warn!(kind = %kind, error = %e, "watch error, backing off"),
        }
    }
    warn!(kind = %kind, "watch stream ended");
}

async fn work(registration: Registration, queue: Arc<WorkQueue<ObjectKey>>, ctx: Arc<Context>) {
    let kind = registration.kind;
    while let Some(key) = queue.dequeue().await {
        let action = match (registration.reconcile)(key.clone(), ctx.clone()).await {
            Ok(action) => {
                debug!(kind = %kind, object = %key, ?action, "reconciliation completed");
                action
            }
            Err(e) => error_policy(kind, &key, &e),
        };
        queue.done(&key);
        if let Some(delay) = action.requeue_after() {
            queue.enqueue_after(key, delay);
        }
    }
}

/// Requeue policy for reconciles that failed to persist their result
pub fn error_policy(kind: ResourceKind, key: &ObjectKey, error: &Error) -> Action {
    error!(kind = %kind, object = %key, %error, "reconciliation failed");
    Action::requeue(recheck_interval())
}
