//! Reconciliation driver for XtraDBCluster resources
//!
//! One pass runs the components in a fixed order: status is observed first,
//! crash recovery acts on that observation, then backup schedules and data
//! volumes are reconciled. The observed status is persisted last, or an error
//! condition is recorded instead when any step failed.

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::backup_schedule::reconcile_schedules;
use crate::controller::context::Context;
use crate::controller::crash_recovery::{RecoveryOutcome, recover_if_needed};
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::status::{StatusUpdate, aggregate, write_status};
use crate::controller::volume_resize::{ResizeOutcome, reconcile_volumes};
use crate::crd::XtraDBCluster;

fn registry_key(ns: &str, name: &str) -> String {
    format!("{}/{}", ns, name)
}

#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<XtraDBCluster>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = cluster.name_any();

    // Owned objects are garbage collected through owner references
    if cluster.metadata.deletion_timestamp.is_some() {
        debug!("Cluster is being deleted");
        ctx.drop_schedules(&registry_key(&ns, &name));
        return Ok(Action::await_change());
    }

    debug!("Reconciling XtraDBCluster");

    let update = match run_pass(&cluster, &ctx, &ns, &name).await {
        Ok(update) => update,
        Err(e) => {
            error!(error = %e, "Reconcile pass failed");
            let failed = StatusUpdate::Failed {
                message: e.to_string(),
            };
            if let Err(write_err) = write_status(&ctx, &cluster, &failed).await {
                warn!(error = %write_err, "Failed to record reconcile error in status");
            }
            return Err(e);
        }
    };

    write_status(&ctx, &cluster, &update).await?;
    ctx.clear_failures(&registry_key(&ns, &name));

    if let Some(ref health) = ctx.health_state {
        health
            .metrics
            .record_reconcile(&ns, &name, started.elapsed().as_secs_f64());
        if let StatusUpdate::Observed {
            pxc,
            haproxy,
            proxysql,
            ..
        } = &update
        {
            let tiers = [
                ("pxc", Some(pxc)),
                ("haproxy", haproxy.as_ref()),
                ("proxysql", proxysql.as_ref()),
            ];
            for (component, status) in tiers {
                if let Some(status) = status {
                    health.metrics.set_component_pods(
                        &ns,
                        &name,
                        component,
                        status.size.into(),
                        status.ready.into(),
                    );
                }
            }
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        health.touch(now);
    }

    Ok(Action::requeue(ctx.config.reconcile_interval))
}

/// Run every component once and return the status to persist
async fn run_pass(
    cluster: &XtraDBCluster,
    ctx: &Context,
    ns: &str,
    name: &str,
) -> Result<StatusUpdate> {
    let (mut update, report) = aggregate(ctx, cluster).await?;

    // Only an unreadable sequence number fails the pass
    match recover_if_needed(ctx, cluster, &report).await {
        Ok(RecoveryOutcome::Signalled { pod, seqno }) => {
            info!(pod = %pod, seqno, "Crash recovery signalled");
        }
        Ok(RecoveryOutcome::Skipped(reason)) => {
            debug!(reason, "Crash recovery skipped");
        }
        Err(e @ Error::CrashLogParseError { .. }) => return Err(e),
        Err(e) => {
            warn!(error = %e, "Crash recovery aborted");
            update.push_message(format!("Crash recovery: {}", e));
        }
    }

    // The registry goes back even when the schedule pass fails
    let key = registry_key(ns, name);
    let mut registry = ctx.checkout_schedules(&key);
    let schedules = reconcile_schedules(ctx, cluster, &mut registry).await;
    ctx.checkin_schedules(&key, registry);
    let schedules = schedules?;
    if schedules.created + schedules.updated + schedules.removed + schedules.pruned > 0 {
        info!(
            created = schedules.created,
            updated = schedules.updated,
            removed = schedules.removed,
            pruned = schedules.pruned,
            "Backup schedules reconciled"
        );
    }

    match reconcile_volumes(ctx, cluster).await? {
        ResizeOutcome::NoChange => {}
        ResizeOutcome::Started { claims } => info!(claims, "Volume resize started"),
        ResizeOutcome::Waiting => debug!("Volume resize still in progress"),
        ResizeOutcome::Completed => info!("Volume resize completed"),
    }

    Ok(update)
}

/// Requeue with exponential backoff keyed on how often this cluster has failed recently
pub fn error_policy(cluster: Arc<XtraDBCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let ns = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();
    let attempt = ctx.record_failure(&registry_key(&ns, &name));
    let delay = BackoffConfig::default().delay_for_error(error, attempt);

    if let Some(ref health) = ctx.health_state {
        health.metrics.record_error(&ns, &name);
    }

    if error.is_retryable() {
        warn!(cluster = %name, error = %error, attempt, delay_secs = delay.as_secs(), "Retryable error, requeuing");
    } else {
        error!(cluster = %name, error = %error, delay_secs = delay.as_secs(), "Reconcile needs owner action, requeuing");
    }

    Action::requeue(delay)
}
