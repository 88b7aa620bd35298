//! Scheduled backups and retention
//!
//! Declared schedules are turned into CronJobs owned by the cluster. After the
//! CronJobs are in place, succeeded backup records of each schedule are pruned
//! down to the schedule's `keep` count, oldest first.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{
    BackupScheduleSpec, BackupState, BackupStorageSpec, XtraDBCluster, XtraDBClusterBackup,
};
use crate::resources::common::{ANCESTOR_LABEL, CLUSTER_LABEL, selector};
use crate::resources::cronjob::{build_backup_cronjob, cronjob_matches, cronjob_name};

/// Everything a backup CronJob is built from
#[derive(Clone, Debug, PartialEq)]
pub struct AppliedSchedule {
    pub schedule: BackupScheduleSpec,
    pub storage: BackupStorageSpec,
    pub image: String,
}

/// Schedules applied for one cluster, keyed by CronJob name
///
/// Owned by the driver and lent to a single pass at a time. An entry is only
/// trusted while its CronJob is still listed.
#[derive(Clone, Debug, Default)]
pub struct ScheduleRegistry {
    entries: HashMap<String, AppliedSchedule>,
}

impl ScheduleRegistry {
    pub fn get(&self, job_name: &str) -> Option<&AppliedSchedule> {
        self.entries.get(job_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record(&mut self, job_name: String, applied: AppliedSchedule) {
        self.entries.insert(job_name, applied);
    }

    fn retain<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.entries.retain(|name, _| keep(name));
    }
}

/// What a scheduler pass changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub pruned: usize,
}

/// Names of the succeeded backups to delete so that at most `keep` remain
///
/// Records in any other state are neither counted nor deleted.
pub fn select_expired(backups: &[XtraDBClusterBackup], keep: usize) -> Vec<String> {
    if backups.len() <= keep {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Reverse<(Option<DateTime<Utc>>, String)>> = backups
        .iter()
        .filter(|b| b.state() == BackupState::Succeeded)
        .map(|b| Reverse((b.creation_timestamp().map(|t| t.0), b.name_any())))
        .collect();

    if heap.len() <= keep {
        return Vec::new();
    }

    let expired = heap.len() - keep;
    let mut names = Vec::with_capacity(expired);
    for _ in 0..expired {
        if let Some(Reverse((_, name))) = heap.pop() {
            names.push(name);
        }
    }
    names
}

/// Delete expired backups of one schedule; individual delete failures are logged
pub async fn prune(
    ctx: &Context,
    ns: &str,
    cluster_name: &str,
    job_name: &str,
    keep: u32,
) -> Result<usize> {
    let labels = BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
        (ANCESTOR_LABEL.to_string(), job_name.to_string()),
    ]);
    let backups = ctx.client.list_backups(ns, &selector(&labels)).await?;

    let mut deleted = 0;
    for name in select_expired(&backups, keep as usize) {
        match ctx.client.delete_backup(ns, &name).await {
            Ok(()) => {
                info!(backup = %name, schedule = %job_name, "Deleted expired backup");
                deleted += 1;
            }
            Err(e) => warn!(backup = %name, error = %e, "Failed to delete expired backup"),
        }
    }
    Ok(deleted)
}

/// Reconcile declared schedules into CronJobs and enforce retention
pub async fn reconcile_schedules(
    ctx: &Context,
    cluster: &XtraDBCluster,
    registry: &mut ScheduleRegistry,
) -> Result<ScheduleOutcome> {
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = cluster.name_any();
    let mut outcome = ScheduleOutcome::default();

    let owned: HashSet<String> = ctx
        .client
        .list_cronjobs(
            &ns,
            &selector(&BTreeMap::from([(
                CLUSTER_LABEL.to_string(),
                name.clone(),
            )])),
        )
        .await?
        .iter()
        .map(|job| job.name_any())
        .collect();
    // CronJobs deleted elsewhere are rebuilt
    registry.retain(|job_name| owned.contains(job_name));

    let mut declared: BTreeMap<String, BackupScheduleSpec> = BTreeMap::new();
    if let Some(ref backup) = cluster.spec.backup {
        for schedule in &backup.schedule {
            let job_name = cronjob_name(&name, &schedule.name);
            declared.insert(job_name.clone(), schedule.clone());

            let Some(storage) = backup.storages.get(&schedule.storage_name) else {
                warn!(
                    cluster = %name,
                    schedule = %schedule.name,
                    storage = %schedule.storage_name,
                    "Invalid storage name for backup schedule"
                );
                continue;
            };

            let applied = AppliedSchedule {
                schedule: schedule.clone(),
                storage: storage.clone(),
                image: backup.image.clone(),
            };
            if registry.get(&job_name) == Some(&applied) {
                continue;
            }

            let desired = build_backup_cronjob(
                cluster,
                schedule,
                storage,
                &backup.image,
                ctx.config.backup_service_account.as_deref(),
            );

            match ctx.client.get_cronjob(&ns, &job_name).await? {
                None => {
                    info!(cronjob = %job_name, schedule = %schedule.schedule, "Creating backup CronJob");
                    ctx.client.create_cronjob(&ns, &desired).await?;
                    outcome.created += 1;
                }
                Some(existing) if !cronjob_matches(&existing, &desired) => {
                    info!(cronjob = %job_name, schedule = %schedule.schedule, "Updating backup CronJob");
                    let mut replacement = desired;
                    replacement.metadata.resource_version = existing.resource_version();
                    ctx.client.replace_cronjob(&ns, &replacement).await?;
                    outcome.updated += 1;
                }
                Some(_) => {}
            }
            registry.record(job_name, applied);
        }
    }

    for job_name in &owned {
        if !declared.contains_key(job_name) {
            info!(cronjob = %job_name, "Deleting backup CronJob of removed schedule");
            ctx.client.delete_cronjob(&ns, job_name).await?;
            outcome.removed += 1;
        }
    }
    registry.retain(|job_name| declared.contains_key(job_name));

    for (job_name, schedule) in &declared {
        if schedule.keep == 0 {
            continue;
        }
        match prune(ctx, &ns, &name, job_name, schedule.keep).await {
            Ok(n) => outcome.pruned += n,
            Err(e) => warn!(schedule = %job_name, error = %e, "Failed to list backups for pruning"),
        }
    }

    if outcome.pruned > 0
        && let Some(ref health) = ctx.health_state
    {
        health.metrics.record_backups_pruned(&ns, &name, outcome.pruned as u64);
    }

    debug!(cluster = %name, ?outcome, tracked = registry.len(), "Reconciled backup schedules");
    Ok(outcome)
}
