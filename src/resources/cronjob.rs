//! Recurring backup jobs
//!
//! Each declared schedule becomes one CronJob. A run of the job creates an
//! `XtraDBClusterBackup` record labelled with the schedule it came from, which
//! is what retention pruning later selects on.

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{BackupScheduleSpec, BackupStorageSpec, XtraDBCluster};
use crate::resources::common::{
    ANCESTOR_LABEL, BACKUP_TYPE_LABEL, CLUSTER_LABEL, owner_reference, schedule_labels,
    truncate_name,
};

/// CronJob names are limited so the generated Job and pod names stay valid
pub const MAX_CRONJOB_NAME_LEN: usize = 52;

/// Name of the CronJob backing a schedule
pub fn cronjob_name(cluster_name: &str, schedule_name: &str) -> String {
    truncate_name(
        &format!("{}-backup-{}", cluster_name, schedule_name),
        MAX_CRONJOB_NAME_LEN,
    )
}

fn backup_manifest_script(
    namespace: &str,
    cluster_name: &str,
    job_name: &str,
    storage_name: &str,
) -> String {
    let prefix = format!(
        "cron-{}-{}",
        truncate_name(cluster_name, 16),
        truncate_name(storage_name, 16)
    );
    format!(
        r#"cat <<EOF | kubectl apply -f -
apiVersion: xtradb.example.com/v1
kind: XtraDBClusterBackup
metadata:
  namespace: "{namespace}"
  name: "{prefix}-$(date -u +%Y%m%d%H%M%S)"
  labels:
    {CLUSTER_LABEL}: "{cluster_name}"
    {ANCESTOR_LABEL}: "{job_name}"
    {BACKUP_TYPE_LABEL}: "cron"
spec:
  pxcCluster: "{cluster_name}"
  storageName: "{storage_name}"
EOF
"#
    )
}

/// Build the CronJob for one declared schedule
pub fn build_backup_cronjob(
    cluster: &XtraDBCluster,
    schedule: &BackupScheduleSpec,
    storage: &BackupStorageSpec,
    image: &str,
    service_account: Option<&str>,
) -> CronJob {
    let cluster_name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cronjob_name(&cluster_name, &schedule.name);

    let mut labels = schedule_labels(&cluster_name, &name);
    labels.insert(BACKUP_TYPE_LABEL.to_string(), "cron".to_string());

    let container = Container {
        name: "run-backup".to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![backup_manifest_script(
            &namespace,
            &cluster_name,
            &name,
            &schedule.storage_name,
        )]),
        env: Some(vec![EnvVar {
            name: "STORAGE_TYPE".to_string(),
            value: Some(storage.storage_type().to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    CronJob {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.schedule.clone(),
            concurrency_policy: Some("Forbid".to_string()),
            successful_jobs_history_limit: Some(1),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    backoff_limit: Some(2),
                    template: PodTemplateSpec {
                        metadata: Some(ObjectMeta {
                            labels: Some(labels),
                            ..Default::default()
                        }),
                        spec: Some(PodSpec {
                            containers: vec![container],
                            restart_policy: Some("Never".to_string()),
                            service_account_name: service_account.map(str::to_string),
                            ..Default::default()
                        }),
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn backup_container(cronjob: &CronJob) -> Option<&Container> {
    cronjob
        .spec
        .as_ref()?
        .job_template
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()
}

/// Whether an existing CronJob already carries the desired schedule, labels and command
///
/// Only fields the operator sets are compared; the API server defaults the rest.
pub fn cronjob_matches(existing: &CronJob, desired: &CronJob) -> bool {
    let (Some(current), Some(wanted)) = (&existing.spec, &desired.spec) else {
        return false;
    };
    let same_container = match (backup_container(existing), backup_container(desired)) {
        (Some(a), Some(b)) => a.image == b.image && a.args == b.args && a.env == b.env,
        _ => false,
    };
    existing.metadata.labels == desired.metadata.labels
        && current.schedule == wanted.schedule
        && same_container
}
