//! Full cluster crash recovery
//!
//! When every database node has lost quorum at once, Galera cannot pick a
//! primary component on its own. Each node's entrypoint prints a banner with
//! its last committed sequence number and waits. Recovery picks the most
//! advanced node and signals it to bootstrap a new cluster.

use std::sync::LazyLock;

use kube::ResourceExt;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::status::{ComponentReport, DatabaseNodes, StatefulComponent};
use crate::crd::XtraDBCluster;
use crate::exec::PodExecutor;
use crate::resources::common::pod_name;

/// Container running the database server
pub const DATABASE_CONTAINER: &str = "pxc";

/// Number of log lines the crash banner occupies
pub const CRASH_LOG_LINES: i64 = 7;

pub(crate) const CRASH_BORDER: &str = "################################################################################################################################";

const CRASH_NOTICE: &str = "You have the situation of a full PXC cluster crash.";

static SEQNO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"node with sequence number [(]seqno[)]: ([-]?\d+)").expect("valid seqno regex")
});

/// Command making the entrypoint bootstrap from the local node
const BOOTSTRAP_SIGNAL: [&str; 3] = ["/bin/sh", "-c", "kill -s USR1 1"];

/// Coordinator state, rebuilt from the observed database pods every pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryState {
    /// Nothing to do, with the reason
    Idle(&'static str),
    /// Every expected database pod is running but not ready
    Recovering,
}

impl RecoveryState {
    /// Every expected database pod must exist, run and not be ready
    pub fn observe(cluster: &XtraDBCluster, report: &ComponentReport) -> Self {
        if !cluster.spec.pxc.auto_recovery {
            return RecoveryState::Idle("auto recovery disabled");
        }
        if cluster.spec.pause {
            return RecoveryState::Idle("cluster paused");
        }
        let size = cluster.spec.pxc.size;
        if size == 0 {
            return RecoveryState::Idle("no database nodes declared");
        }
        let sts = DatabaseNodes::new(cluster).workload_set();
        for ordinal in 0..size {
            let name = pod_name(&sts, ordinal);
            let Some(pod) = report.pods.iter().find(|p| p.name == name) else {
                return RecoveryState::Idle("not all database pods exist");
            };
            if !pod.running {
                return RecoveryState::Idle("not all database pods are running");
            }
            if pod.ready {
                return RecoveryState::Idle("a database pod is ready");
            }
        }
        RecoveryState::Recovering
    }
}

/// Sequence number a crashed node reported, valid for one attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoverySignature {
    pub pod: String,
    pub ordinal: i32,
    pub seqno: i64,
}

/// What a recovery pass did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Preconditions not met; nothing was done
    Skipped(&'static str),
    /// The leader was signalled to bootstrap
    Signalled { pod: String, seqno: i64 },
}

/// Whether a log tail is exactly the crash banner
pub fn has_crash_banner(log: &str) -> bool {
    let border = format!("{}\n", CRASH_BORDER);
    log.starts_with(&border) && log.ends_with(&border) && log.contains(CRASH_NOTICE)
}

/// Extract the sequence number from a crash banner
pub fn parse_seqno(pod: &str, log: &str) -> Result<i64> {
    let captured = SEQNO_RE
        .captures(log)
        .and_then(|c| c.get(1))
        .ok_or_else(|| Error::CrashLogParseError {
            pod: pod.to_string(),
            reason: "no sequence number line".to_string(),
        })?;

    captured
        .as_str()
        .trim()
        .parse()
        .map_err(|e| Error::CrashLogParseError {
            pod: pod.to_string(),
            reason: format!("invalid sequence number {:?}: {}", captured.as_str(), e),
        })
}

/// Whether a database pod is parked waiting for crash recovery
pub async fn is_waiting_for_recovery(
    executor: &dyn PodExecutor,
    ns: &str,
    pod: &str,
) -> Result<bool> {
    let log = executor
        .logs(ns, pod, DATABASE_CONTAINER, CRASH_LOG_LINES)
        .await?;
    Ok(has_crash_banner(&log))
}

/// Pick the node with the strictly highest sequence number; ties go to the lowest ordinal
pub fn select_leader(signatures: &[RecoverySignature]) -> Option<&RecoverySignature> {
    signatures.iter().fold(None, |best, sig| match best {
        Some(b) if b.seqno > sig.seqno || (b.seqno == sig.seqno && b.ordinal <= sig.ordinal) => {
            Some(b)
        }
        _ => Some(sig),
    })
}

/// Detect a full cluster crash and signal the most advanced node to bootstrap
pub async fn recover_if_needed(
    ctx: &Context,
    cluster: &XtraDBCluster,
    report: &ComponentReport,
) -> Result<RecoveryOutcome> {
    let name = cluster.name_any();
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;

    if let RecoveryState::Idle(reason) = RecoveryState::observe(cluster, report) {
        debug!(cluster = %name, reason, "Crash recovery not needed");
        return Ok(RecoveryOutcome::Skipped(reason));
    }
    debug!(cluster = %name, "All database pods are down, inspecting logs");

    let sts = DatabaseNodes::new(cluster).workload_set();
    let mut signatures = Vec::with_capacity(cluster.spec.pxc.size as usize);
    for ordinal in 0..cluster.spec.pxc.size {
        let pod = pod_name(&sts, ordinal);
        let log = match ctx
            .executor
            .logs(&ns, &pod, DATABASE_CONTAINER, CRASH_LOG_LINES)
            .await
        {
            Ok(log) => log,
            Err(e) if e.is_not_found() => {
                return Ok(RecoveryOutcome::Skipped("database pod disappeared"));
            }
            Err(e) => return Err(e),
        };

        if !has_crash_banner(&log) {
            return Ok(RecoveryOutcome::Skipped("crash banner not shown by every pod"));
        }

        signatures.push(RecoverySignature {
            seqno: parse_seqno(&pod, &log)?,
            pod,
            ordinal,
        });
    }

    let Some(leader) = select_leader(&signatures) else {
        return Ok(RecoveryOutcome::Skipped("no crashed pods"));
    };

    info!(
        cluster = %name,
        pod = %leader.pod,
        seqno = leader.seqno,
        "Full cluster crash detected, bootstrapping from most advanced node"
    );

    if ctx.client.get_pod(&ns, &leader.pod).await?.is_none() {
        return Ok(RecoveryOutcome::Skipped("leader pod disappeared"));
    }

    let output = ctx
        .executor
        .exec(
            &ns,
            &leader.pod,
            DATABASE_CONTAINER,
            BOOTSTRAP_SIGNAL.iter().map(|s| s.to_string()).collect(),
            None,
            false,
        )
        .await?;

    if !output.stderr.is_empty() {
        warn!(pod = %leader.pod, stderr = %output.stderr, "Bootstrap signal reported errors");
        return Err(Error::ExecError {
            pod: leader.pod.clone(),
            message: format!("invalid exec command return: {}", output.stderr),
        });
    }

    if let Some(ref health) = ctx.health_state {
        health.metrics.record_crash_recovery(&ns, &name);
    }

    // Give the entrypoint time to react before the next pass looks again
    tokio::time::sleep(ctx.config.recovery_settle).await;

    Ok(RecoveryOutcome::Signalled {
        pod: leader.pod.clone(),
        seqno: leader.seqno,
    })
}
