//! Unit tests for generated backup CronJobs

use crate::common::*;
use xtradb_operator::crd::BackupStorageSpec;
use xtradb_operator::resources::common::{ANCESTOR_LABEL, BACKUP_TYPE_LABEL, CLUSTER_LABEL};
use xtradb_operator::resources::cronjob::{
    MAX_CRONJOB_NAME_LEN, build_backup_cronjob, cronjob_matches, cronjob_name,
};

fn nightly_cronjob() -> k8s_openapi::api::batch::v1::CronJob {
    let cluster = XtraDBClusterBuilder::new("cluster1", "default")
        .with_schedule("nightly", "0 2 * * *", 2, "fs")
        .build();
    let backup = cluster.spec.backup.as_ref().unwrap();
    build_backup_cronjob(
        &cluster,
        &backup.schedule[0],
        &backup.storages["fs"],
        &backup.image,
        Some("xtradb-backup"),
    )
}

#[test]
fn test_cronjob_identity_and_labels() {
    let job = nightly_cronjob();
    assert_eq!(job.metadata.name.as_deref(), Some("cluster1-backup-nightly"));
    assert_eq!(job.metadata.namespace.as_deref(), Some("default"));

    let labels = job.metadata.labels.as_ref().unwrap();
    assert_eq!(labels[CLUSTER_LABEL], "cluster1");
    assert_eq!(labels[ANCESTOR_LABEL], "cluster1-backup-nightly");
    assert_eq!(labels[BACKUP_TYPE_LABEL], "cron");

    let owner = &job.metadata.owner_references.as_ref().unwrap()[0];
    assert_eq!(owner.kind, "XtraDBCluster");
    assert_eq!(owner.name, "cluster1");
    assert_eq!(owner.controller, Some(true));
}

#[test]
fn test_cronjob_runs_one_backup_at_a_time() {
    let job = nightly_cronjob();
    let spec = job.spec.as_ref().unwrap();
    assert_eq!(spec.schedule, "0 2 * * *");
    assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));

    let pod = spec.job_template.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
    assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
    assert_eq!(pod.service_account_name.as_deref(), Some("xtradb-backup"));

    let script = &pod.containers[0].args.as_ref().unwrap()[0];
    assert!(script.contains("kind: XtraDBClusterBackup"));
    assert!(script.contains("storageName: \"fs\""));
    assert!(script.contains(&format!("{}: \"cluster1-backup-nightly\"", ANCESTOR_LABEL)));
}

#[test]
fn test_cronjob_names_are_bounded() {
    let name = cronjob_name(
        "a-very-long-cluster-name-for-production",
        "every-fifteen-minutes-to-offsite-storage",
    );
    assert!(name.len() <= MAX_CRONJOB_NAME_LEN);
    assert!(!name.ends_with('-'));
}

#[test]
fn test_matches_ignores_server_defaults() {
    let desired = nightly_cronjob();
    let mut existing = desired.clone();
    existing.metadata.resource_version = Some("42".to_string());
    if let Some(spec) = existing.spec.as_mut() {
        spec.suspend = Some(false);
        spec.failed_jobs_history_limit = Some(1);
    }
    assert!(cronjob_matches(&existing, &desired));
}

#[test]
fn test_matches_detects_schedule_and_storage_changes() {
    let desired = nightly_cronjob();

    let mut rescheduled = desired.clone();
    rescheduled.spec.as_mut().unwrap().schedule = "0 3 * * *".to_string();
    assert!(!cronjob_matches(&rescheduled, &desired));

    let cluster = XtraDBClusterBuilder::new("cluster1", "default")
        .with_schedule("nightly", "0 2 * * *", 2, "fs")
        .build();
    let backup = cluster.spec.backup.as_ref().unwrap();
    let s3 = BackupStorageSpec::S3 {
        bucket: "backups".to_string(),
        region: None,
        endpoint_url: None,
        credentials_secret: "s3-creds".to_string(),
    };
    let moved = build_backup_cronjob(&cluster, &backup.schedule[0], &s3, &backup.image, Some("xtradb-backup"));
    assert!(!cronjob_matches(&moved, &desired));
}

mod cluster_tests {
    use super::*;
    use xtradb_operator::controller::volume_resize::ResizeState;

    #[test]
    fn test_proxy_tiers_enabled_flags() {
        let plain = create_test_cluster("cluster1", "default", 3);
        assert!(!plain.haproxy_enabled());

        let fronted = XtraDBClusterBuilder::new("cluster1", "default")
            .with_size(5)
            .with_haproxy(2)
            .build();
        assert!(fronted.haproxy_enabled());
        assert!(!fronted.proxysql_enabled());
        assert_eq!(fronted.spec.pxc.size, 5);
    }

    #[test]
    fn test_resize_state_follows_annotation() {
        let idle = create_test_cluster("cluster1", "default", 3);
        assert_eq!(ResizeState::from_cluster(&idle).unwrap(), ResizeState::NotStarted);

        let resizing = XtraDBClusterBuilder::new("cluster1", "default")
            .with_resize_started(base_time())
            .build();
        assert_eq!(
            ResizeState::from_cluster(&resizing).unwrap(),
            ResizeState::InProgress(base_time())
        );
    }
}
