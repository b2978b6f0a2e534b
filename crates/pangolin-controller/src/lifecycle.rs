//! Reconcile lifecycle shared by all four kinds
//!
//! Every reconcile follows the same shape: fetch, handle deletion, ensure the
//! finalizer, gate on dependencies, converge, publish. This module holds the
//! pieces of that shape that don't depend on the kind: object keys, requeue
//! actions, the three outcomes and how they are recorded in status, and the
//! finalizer gate.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use pangolin_common::condition::{upsert_condition, READY_CONDITION};
use pangolin_common::crd::{
    Condition, ConditionStatus, PangolinBindingStatus, PangolinOrganization,
    PangolinOrganizationStatus, PangolinResourceStatus, PangolinTunnel, PangolinTunnelStatus,
    ReconcilePhase,
};
use pangolin_common::kube_utils::{
    has_finalizer, is_deleting, object_ref, with_finalizer, without_finalizer,
};
use pangolin_common::{Error, RECHECK_INTERVAL_SECS};

use crate::context::KubeClient;
use crate::registry::ResourceKind;

/// Condition reason for a converged object
pub const REASON_SUCCESS: &str = "ReconcileSuccess";
/// Condition reason while a dependency is not Ready
pub const REASON_DEPENDENCY: &str = "DependencyNotReady";
/// Condition reason for configuration or remote failures
pub const REASON_ERROR: &str = "ReconcileError";

/// Identity of a namespaced object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Key for `namespace/name`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a namespaced object; `None` for objects without a namespace
    pub fn from_object<K: Resource>(obj: &K) -> Option<Self> {
        Some(Self::new(obj.namespace()?, obj.meta().name.clone()?))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the runner should do with a key after a reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile again after `duration`
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Only reconcile again when the object changes
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Requeue delay, if any
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Fixed re-check delay for `Waiting` and `Error`
pub fn recheck_interval() -> Duration {
    Duration::from_secs(RECHECK_INTERVAL_SECS)
}

/// Result of converging one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Converged
    Ready(String),
    /// A dependency is not Ready yet
    Waiting(String),
    /// Configuration, lookup or remote failure
    Error(String),
}

impl Outcome {
    /// Ready outcome
    pub fn ready(msg: impl Into<String>) -> Self {
        Self::Ready(msg.into())
    }

    /// Waiting outcome
    pub fn waiting(msg: impl Into<String>) -> Self {
        Self::Waiting(msg.into())
    }

    /// Error outcome carrying the error's message
    pub fn error(err: &Error) -> Self {
        Self::Error(err.to_string())
    }

    /// Phase mirrored into `status.status`
    pub fn phase(&self) -> ReconcilePhase {
        match self {
            Self::Ready(_) => ReconcilePhase::Ready,
            Self::Waiting(_) => ReconcilePhase::Waiting,
            Self::Error(_) => ReconcilePhase::Error,
        }
    }

    /// Ready condition for this outcome
    pub fn condition(&self, generation: Option<i64>) -> Condition {
        let (status, reason, message) = match self {
            Self::Ready(m) => (ConditionStatus::True, REASON_SUCCESS, m),
            Self::Waiting(m) => (ConditionStatus::False, REASON_DEPENDENCY, m),
            Self::Error(m) => (ConditionStatus::False, REASON_ERROR, m),
        };
        Condition::new(READY_CONDITION, status, reason, message.as_str())
            .observed_generation(generation)
    }

    /// Requeue policy: Ready waits for a change, the rest re-check on a timer
    pub fn action(&self) -> Action {
        match self {
            Self::Ready(_) => Action::await_change(),
            Self::Waiting(_) | Self::Error(_) => Action::requeue(recheck_interval()),
        }
    }
}

/// Status types that record an [`Outcome`]
pub trait OutcomeStatus {
    /// Mutable access to the phase, conditions and observed generation
    fn outcome_fields(
        &mut self,
    ) -> (&mut ReconcilePhase, &mut Vec<Condition>, &mut Option<i64>);

    /// Record `outcome` computed from `generation`
    fn record(&mut self, outcome: &Outcome, generation: Option<i64>) {
        let (phase, conditions, observed) = self.outcome_fields();
        *phase = outcome.phase();
        upsert_condition(conditions, outcome.condition(generation), Utc::now());
        *observed = generation;
    }
}

macro_rules! impl_outcome_status {
    ($($status:ty),+ $(,)?) => {
        $(
            impl OutcomeStatus for $status {
                fn outcome_fields(
                    &mut self,
                ) -> (&mut ReconcilePhase, &mut Vec<Condition>, &mut Option<i64>) {
                    (&mut self.status, &mut self.conditions, &mut self.observed_generation)
                }
            }
        )+
    };
}

impl_outcome_status!(
    PangolinOrganizationStatus,
    PangolinTunnelStatus,
    PangolinResourceStatus,
    PangolinBindingStatus,
);

/// Handle deletion and finalizer bookkeeping before convergence.
///
/// Returns `Some(action)` when this cycle must stop here:
/// - deleting with our finalizer: log cleanup, remove the finalizer
/// - deleting without it: nothing to do
/// - finalizer missing: add it and wait for the resulting event
///
/// Remote entities are never deleted; Bound ones aren't ours and the control
/// plane contract has no delete calls. Generated children go away through
/// owner references.
pub async fn finalizer_gate<K>(
    kube: &dyn KubeClient,
    kind: ResourceKind,
    obj: &K,
    finalizer: &str,
) -> Result<Option<Action>, Error>
where
    K: Resource,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    if is_deleting(obj) {
        if has_finalizer(obj, finalizer) {
            info!(kind = %kind, object = %format!("{namespace}/{name}"), "cleaning up before deletion");
            kube.set_finalizers(
                kind,
                &namespace,
                &name,
                without_finalizer(obj, finalizer),
                obj.meta().resource_version.clone(),
            )
            .await?;
        }
        return Ok(Some(Action::await_change()));
    }

    if !has_finalizer(obj, finalizer) {
        debug!(kind = %kind, object = %format!("{namespace}/{name}"), "adding finalizer");
        kube.set_finalizers(
            kind,
            &namespace,
            &name,
            with_finalizer(obj, finalizer),
            obj.meta().resource_version.clone(),
        )
        .await?;
        return Ok(Some(Action::await_change()));
    }

    Ok(None)
}

/// A dependency read during the gate step
#[derive(Debug)]
pub enum Gate<T> {
    /// The dependency is Ready; carries what the dependent needs from it
    Open(T),
    /// The dependency exists but isn't Ready yet
    Closed(Outcome),
}

/// Gate on an Organization referenced by `dependent`.
///
/// Missing is an error; present but not Ready (or without an id) is Waiting.
pub async fn organization_gate<K: Resource>(
    kube: &dyn KubeClient,
    dependent: &K,
    name: &str,
) -> Result<Gate<(PangolinOrganization, String)>, Error> {
    let namespace = dependent.namespace().unwrap_or_default();
    let org = kube
        .get_organization(&namespace, name)
        .await?
        .ok_or_else(|| {
            Error::validation_for(
                object_ref(dependent),
                format!("organization {namespace}/{name} not found"),
            )
        })?;

    let org_id = org
        .organization_id()
        .filter(|_| org.is_ready())
        .map(str::to_string);
    Ok(match org_id {
        Some(id) => Gate::Open((org, id)),
        None => Gate::Closed(Outcome::waiting(format!("organization {name} is not Ready"))),
    })
}

/// Gate on a Tunnel referenced by `dependent`; Open carries its site id
pub async fn tunnel_gate<K: Resource>(
    kube: &dyn KubeClient,
    dependent: &K,
    name: &str,
) -> Result<Gate<(PangolinTunnel, i64)>, Error> {
    let namespace = dependent.namespace().unwrap_or_default();
    let tunnel = kube
        .get_tunnel(&namespace, name)
        .await?
        .ok_or_else(|| {
            Error::validation_for(
                object_ref(dependent),
                format!("tunnel {namespace}/{name} not found"),
            )
        })?;

    let site_id = tunnel.site_id().filter(|_| tunnel.is_ready());
    Ok(match site_id {
        Some(id) => Gate::Open((tunnel, id)),
        None => Gate::Closed(Outcome::waiting(format!("tunnel {name} is not Ready"))),
    })
}
