//! Status aggregation for XtraDBCluster resources
//!
//! Each component (database nodes, HAProxy, ProxySQL) is observed through the
//! [`StatefulComponent`] capability, folded into a [`ComponentStatus`], and the
//! component states are joined into one cluster state. Persisting goes through
//! a get-modify-replace loop retried on write conflicts.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::controller::Context;
use crate::controller::crash_recovery::is_waiting_for_recovery;
use crate::controller::error::{Error, Result, retry_on_conflict};
use crate::crd::{AppState, ClusterCondition, ComponentStatus, XtraDBCluster, XtraDBClusterStatus};
use crate::resources::common::{REVISION_HASH_LABEL, component_labels, selector, statefulset_name};

/// Upper bound on the stored condition history
pub const MAX_CONDITIONS: usize = 20;

/// How long a pod may stay unschedulable before the reason is surfaced
const UNSCHEDULABLE_GRACE_SECS: i64 = 60;

const CONDITION_TRUE: &str = "True";

/// The operations the engine needs from one homogeneous tier of the cluster
pub trait StatefulComponent: Send + Sync {
    /// Short name used in labels and object names (`pxc`, `haproxy`, `proxysql`)
    fn name(&self) -> &'static str;

    /// Prefix used in human-readable messages
    fn display_name(&self) -> &'static str;

    /// Labels selecting the component's pods
    fn labels(&self) -> BTreeMap<String, String>;

    /// Declared number of pods
    fn desired_size(&self) -> i32;

    /// Name of the StatefulSet running the component
    fn workload_set(&self) -> String;

    /// Database pods get the crash-recovery and revision checks
    fn is_database(&self) -> bool {
        false
    }
}

/// Galera database members
pub struct DatabaseNodes<'a> {
    cluster: &'a XtraDBCluster,
}

impl<'a> DatabaseNodes<'a> {
    pub const NAME: &'static str = "pxc";

    pub fn new(cluster: &'a XtraDBCluster) -> Self {
        Self { cluster }
    }
}

impl StatefulComponent for DatabaseNodes<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display_name(&self) -> &'static str {
        "PXC"
    }

    fn labels(&self) -> BTreeMap<String, String> {
        component_labels(&self.cluster.name_any(), Self::NAME)
    }

    fn desired_size(&self) -> i32 {
        self.cluster.spec.pxc.size
    }

    fn workload_set(&self) -> String {
        statefulset_name(&self.cluster.name_any(), Self::NAME)
    }

    fn is_database(&self) -> bool {
        true
    }
}

/// HAProxy tier
pub struct HaProxyNodes<'a> {
    cluster: &'a XtraDBCluster,
}

impl<'a> HaProxyNodes<'a> {
    pub const NAME: &'static str = "haproxy";

    pub fn new(cluster: &'a XtraDBCluster) -> Self {
        Self { cluster }
    }
}

impl StatefulComponent for HaProxyNodes<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display_name(&self) -> &'static str {
        "HAProxy"
    }

    fn labels(&self) -> BTreeMap<String, String> {
        component_labels(&self.cluster.name_any(), Self::NAME)
    }

    fn desired_size(&self) -> i32 {
        self.cluster.spec.haproxy.as_ref().map_or(0, |p| p.size)
    }

    fn workload_set(&self) -> String {
        statefulset_name(&self.cluster.name_any(), Self::NAME)
    }
}

/// ProxySQL tier
pub struct ProxySqlNodes<'a> {
    cluster: &'a XtraDBCluster,
}

impl<'a> ProxySqlNodes<'a> {
    pub const NAME: &'static str = "proxysql";

    pub fn new(cluster: &'a XtraDBCluster) -> Self {
        Self { cluster }
    }
}

impl StatefulComponent for ProxySqlNodes<'_> {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn display_name(&self) -> &'static str {
        "ProxySQL"
    }

    fn labels(&self) -> BTreeMap<String, String> {
        component_labels(&self.cluster.name_any(), Self::NAME)
    }

    fn desired_size(&self) -> i32 {
        self.cluster.spec.proxysql.as_ref().map_or(0, |p| p.size)
    }

    fn workload_set(&self) -> String {
        statefulset_name(&self.cluster.name_any(), Self::NAME)
    }
}

/// What was learned about one pod during a pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodObservation {
    pub name: String,
    /// Pod phase is `Running`
    pub running: bool,
    /// Counted as ready after all readiness checks
    pub ready: bool,
    /// `container: message` for every waiting container of a not-ready pod
    pub waiting: Vec<String>,
    /// Scheduler message and the time the pod became unschedulable
    pub unschedulable: Option<(DateTime<Utc>, String)>,
}

/// Observed state of one component before evaluation
#[derive(Clone, Debug, Default)]
pub struct ComponentObservation {
    pub size: i32,
    pub paused: bool,
    pub pods: Vec<PodObservation>,
    /// The workload set has replicas not yet on its update revision
    pub upgrading: bool,
}

/// Database pods as observed by the aggregator, handed to crash recovery
#[derive(Clone, Debug, Default)]
pub struct ComponentReport {
    pub pods: Vec<PodObservation>,
}

fn condition_true(pod: &Pod, type_: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == type_ && c.status == CONDITION_TRUE)
        })
}

/// Whether every container of the pod reports ready
pub fn containers_ready(pod: &Pod) -> bool {
    condition_true(pod, "ContainersReady")
}

/// Whether the pod's template revision matches the workload set's update revision
pub fn on_update_revision(pod: &Pod, update_revision: Option<&str>) -> bool {
    match (pod.labels().get(REVISION_HASH_LABEL), update_revision) {
        (Some(revision), Some(update)) => revision == update,
        _ => false,
    }
}

fn waiting_messages(pod: &Pod) -> Vec<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter_map(|cs| {
                    let waiting = cs.state.as_ref()?.waiting.as_ref()?;
                    let message = waiting.message.as_deref().filter(|m| !m.is_empty())?;
                    Some(format!("{}: {}", cs.name, message))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn unschedulable(pod: &Pod) -> Option<(DateTime<Utc>, String)> {
    let cond = pod
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "PodScheduled" && c.reason.as_deref() == Some("Unschedulable"))?;
    let since = cond.last_transition_time.as_ref()?.0;
    Some((since, cond.message.clone().unwrap_or_default()))
}

/// Workload set has replicas still running an older template
pub fn rollout_in_progress(sts: &StatefulSet) -> bool {
    sts.status
        .as_ref()
        .is_some_and(|s| s.updated_replicas.unwrap_or(0) < s.replicas)
}

/// Observe a component: list its pods and run the readiness checks
pub async fn observe_component(
    ctx: &Context,
    ns: &str,
    component: &dyn StatefulComponent,
    paused: bool,
) -> Result<ComponentObservation> {
    let pods = ctx
        .client
        .list_pods(ns, &selector(&component.labels()))
        .await?;
    let sts = ctx
        .client
        .get_statefulset(ns, &component.workload_set())
        .await?;
    let update_revision = sts
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .and_then(|s| s.update_revision.clone());

    let mut observed = Vec::with_capacity(pods.len());
    for pod in &pods {
        let name = pod.name_any();
        let mut ready = containers_ready(pod);
        if ready && component.is_database() {
            let waiting = is_waiting_for_recovery(ctx.executor.as_ref(), ns, &name).await?;
            ready = !waiting && on_update_revision(pod, update_revision.as_deref());
        }

        observed.push(PodObservation {
            running: pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .is_some_and(|p| p == "Running"),
            waiting: if containers_ready(pod) {
                Vec::new()
            } else {
                waiting_messages(pod)
            },
            unschedulable: unschedulable(pod),
            name,
            ready,
        });
    }

    Ok(ComponentObservation {
        size: component.desired_size(),
        paused,
        pods: observed,
        upgrading: sts.as_ref().is_some_and(rollout_in_progress),
    })
}

/// Fold an observation into a component status
pub fn evaluate_component(obs: &ComponentObservation, now: DateTime<Utc>) -> ComponentStatus {
    let ready = obs.pods.iter().filter(|p| p.ready).count() as i32;

    let mut message: String = obs
        .pods
        .iter()
        .flat_map(|p| p.waiting.iter())
        .map(|m| format!("{}; ", m))
        .collect();

    let grace = Duration::seconds(UNSCHEDULABLE_GRACE_SECS);
    if let Some((_, reason)) = obs
        .pods
        .iter()
        .filter_map(|p| p.unschedulable.as_ref())
        .find(|(since, _)| now - *since > grace)
    {
        message = reason.clone();
    }

    let state = match (obs.paused, ready) {
        (true, 0) => AppState::Paused,
        (true, _) => AppState::Stopping,
        (false, r) if r == obs.size => AppState::Ready,
        _ => AppState::Init,
    };

    ComponentStatus {
        size: obs.size,
        ready,
        state,
        message,
    }
}

/// Join component states into the cluster state
///
/// A rollout in progress holds the cluster at least in `Init`.
pub fn overall_state<'a>(
    states: impl IntoIterator<Item = &'a ComponentStatus>,
    upgrading: bool,
) -> AppState {
    let joined = states
        .into_iter()
        .fold(AppState::Ready, |acc, s| acc.join(s.state));
    if upgrading {
        joined.join(AppState::Init)
    } else {
        joined
    }
}

/// Append a condition unless the latest one already has the same type, keeping the
/// most recent [`MAX_CONDITIONS`] entries
pub fn record_condition(conditions: &mut Vec<ClusterCondition>, condition: ClusterCondition) {
    if conditions.last().is_some_and(|c| c.type_ == condition.type_) {
        return;
    }
    conditions.push(condition);
    if conditions.len() > MAX_CONDITIONS {
        let excess = conditions.len() - MAX_CONDITIONS;
        conditions.drain(..excess);
    }
}

fn condition(type_: AppState, reason: &str, message: &str, now: DateTime<Utc>) -> ClusterCondition {
    ClusterCondition {
        type_,
        status: CONDITION_TRUE.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now.to_rfc3339(),
    }
}

/// Status computed during a pass, applied onto the freshest copy of the resource
#[derive(Clone, Debug)]
pub enum StatusUpdate {
    /// The pass failed for an unrelated reason; only the error is recorded
    Failed { message: String },
    Observed {
        pxc: ComponentStatus,
        haproxy: Option<ComponentStatus>,
        proxysql: Option<ComponentStatus>,
        state: AppState,
        host: String,
        messages: Vec<String>,
        observed_generation: Option<i64>,
    },
}

impl StatusUpdate {
    /// Surface a problem that did not fail the pass
    pub fn push_message(&mut self, message: String) {
        if let StatusUpdate::Observed { messages, .. } = self {
            messages.push(message);
        }
    }

    /// Apply onto `status`; returns false when nothing needs writing
    pub fn apply(&self, status: &mut XtraDBClusterStatus, now: DateTime<Utc>) -> bool {
        match self {
            StatusUpdate::Failed { message } => {
                if status.state == AppState::Error {
                    return false;
                }
                record_condition(
                    &mut status.conditions,
                    condition(AppState::Error, "ErrorReconcile", message, now),
                );
                status.messages.push(format!("Error: {}", message));
                status.state = AppState::Error;
                true
            }
            StatusUpdate::Observed {
                pxc,
                haproxy,
                proxysql,
                state,
                host,
                messages,
                observed_generation,
            } => {
                let before = status.clone();
                status.pxc = Some(pxc.clone());
                status.haproxy = haproxy.clone();
                status.proxysql = proxysql.clone();
                status.state = *state;
                status.host = Some(host.clone());
                status.messages = messages.clone();
                status.observed_generation = *observed_generation;
                record_condition(&mut status.conditions, condition(*state, "", "", now));
                before != *status
            }
        }
    }
}

/// Observe every enabled component and build the status for this pass
pub async fn aggregate(ctx: &Context, cluster: &XtraDBCluster) -> Result<(StatusUpdate, ComponentReport)> {
    let ns = cluster.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = cluster.name_any();
    let paused = cluster.spec.pause;
    let now = Utc::now();

    let pxc_obs = observe_component(ctx, &ns, &DatabaseNodes::new(cluster), paused).await?;
    let pxc = evaluate_component(&pxc_obs, now);
    let mut upgrading = pxc_obs.upgrading;
    let mut host = format!("{}-pxc.{}", name, ns);
    let mut messages = Vec::new();
    if !pxc.message.is_empty() {
        messages.push(format!("PXC: {}", pxc.message));
    }

    let mut proxies: [Option<ComponentStatus>; 2] = [None, None];
    let tiers: [(bool, &dyn StatefulComponent); 2] = [
        (cluster.haproxy_enabled(), &HaProxyNodes::new(cluster)),
        (cluster.proxysql_enabled(), &ProxySqlNodes::new(cluster)),
    ];
    for (slot, (enabled, component)) in proxies.iter_mut().zip(tiers) {
        if !enabled {
            continue;
        }
        let obs = observe_component(ctx, &ns, component, paused).await?;
        let status = evaluate_component(&obs, now);
        upgrading |= obs.upgrading;
        host = format!("{}-{}.{}", name, component.name(), ns);
        if !status.message.is_empty() {
            messages.push(format!("{}: {}", component.display_name(), status.message));
        }
        *slot = Some(status);
    }
    let [haproxy, proxysql] = proxies;

    let state = overall_state(
        std::iter::once(&pxc).chain(haproxy.iter()).chain(proxysql.iter()),
        upgrading,
    );
    debug!(cluster = %name, state = %state, ready = pxc.ready, size = pxc.size, "Aggregated status");

    let report = ComponentReport { pods: pxc_obs.pods };

    Ok((
        StatusUpdate::Observed {
            pxc,
            haproxy,
            proxysql,
            state,
            host,
            messages,
            observed_generation: cluster.metadata.generation,
        },
        report,
    ))
}

/// Persist a status update with bounded retries on write conflicts
pub async fn write_status(ctx: &Context, cluster: &XtraDBCluster, update: &StatusUpdate) -> Result<()> {
    let ns = cluster.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = cluster.name_any();

    let result = retry_on_conflict(ctx.config.status_write_retries, "status update", || {
        let ns = ns.clone();
        let name = name.clone();
        async move {
            let Some(mut latest) = ctx.client.get_cluster(&ns, &name).await? else {
                return Err(Error::NotFound(format!("{}/{}", ns, name)));
            };
            let mut status = latest.status.take().unwrap_or_default();
            let previous = status.state;
            if !update.apply(&mut status, Utc::now()) {
                return Ok(());
            }
            if previous != status.state {
                info!(cluster = %name, from = %previous, to = %status.state, "Cluster state changed");
            }
            latest.status = Some(status);
            ctx.client.replace_cluster_status(&ns, &latest).await?;
            Ok(())
        }
    })
    .await;

    result.map_err(|e| match e {
        e if e.is_conflict() => Error::StatusWriteError(e.to_string()),
        other => other,
    })
}
