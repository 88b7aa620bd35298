//! Builders for XtraDBCluster and XtraDBClusterBackup test resources
//!
//! ```rust,ignore
//! let cluster = XtraDBClusterBuilder::new("cluster1", "default")
//!     .with_size(3)
//!     .with_haproxy(2)
//!     .with_schedule("nightly", "0 2 * * *", 2, "fs")
//!     .build();
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use xtradb_operator::crd::{
    BackupScheduleSpec, BackupSpec, BackupState, BackupStorageSpec, ProxySpec, PxcSpec,
    RESIZE_IN_PROGRESS_ANNOTATION, VolumeSpec, XtraDBCluster, XtraDBClusterBackup,
    XtraDBClusterBackupSpec, XtraDBClusterBackupStatus, XtraDBClusterSpec,
};
use xtradb_operator::resources::common::{ANCESTOR_LABEL, CLUSTER_LABEL};

pub const PXC_IMAGE: &str = "percona/percona-xtradb-cluster:8.0.36";
pub const BACKUP_IMAGE: &str = "percona/percona-xtradb-cluster-operator:1.14.0-pxc8.0-backup";

pub fn create_test_cluster(name: &str, namespace: &str, size: i32) -> XtraDBCluster {
    XtraDBClusterBuilder::new(name, namespace)
        .with_size(size)
        .build()
}

pub struct XtraDBClusterBuilder {
    name: String,
    namespace: String,
    size: i32,
    haproxy: Option<ProxySpec>,
    storages: BTreeMap<String, BackupStorageSpec>,
    schedules: Vec<BackupScheduleSpec>,
    annotations: BTreeMap<String, String>,
}

impl XtraDBClusterBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            size: 3,
            haproxy: None,
            storages: BTreeMap::new(),
            schedules: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_size(mut self, size: i32) -> Self {
        self.size = size;
        self
    }

    pub fn with_haproxy(mut self, size: i32) -> Self {
        self.haproxy = Some(ProxySpec {
            enabled: true,
            size,
            image: None,
        });
        self
    }

    /// Adds a filesystem storage named `storage` if none exists under that name
    pub fn with_schedule(mut self, name: &str, cron: &str, keep: u32, storage: &str) -> Self {
        self.storages
            .entry(storage.to_string())
            .or_insert_with(|| BackupStorageSpec::Filesystem {
                claim_name: format!("{}-backups", storage),
            });
        self.schedules.push(BackupScheduleSpec {
            name: name.to_string(),
            schedule: cron.to_string(),
            keep,
            storage_name: storage.to_string(),
        });
        self
    }

    pub fn with_resize_started(mut self, at: DateTime<Utc>) -> Self {
        self.annotations
            .insert(RESIZE_IN_PROGRESS_ANNOTATION.to_string(), at.to_rfc3339());
        self
    }

    pub fn build(self) -> XtraDBCluster {
        let backup = (!self.schedules.is_empty()).then(|| BackupSpec {
            image: BACKUP_IMAGE.to_string(),
            storages: self.storages,
            schedule: self.schedules,
        });

        XtraDBCluster {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace),
                uid: Some(format!("{}-uid", self.name)),
                generation: Some(1),
                resource_version: Some("1".to_string()),
                annotations: (!self.annotations.is_empty()).then_some(self.annotations),
                ..Default::default()
            },
            spec: XtraDBClusterSpec {
                pxc: PxcSpec {
                    size: self.size,
                    image: PXC_IMAGE.to_string(),
                    auto_recovery: true,
                    volume_spec: VolumeSpec {
                        storage_class: Some("standard".to_string()),
                        storage: "10Gi".to_string(),
                    },
                },
                haproxy: self.haproxy,
                proxysql: None,
                pause: false,
                backup,
            },
            status: None,
        }
    }
}

/// Fixed base time so ordering in retention tests is deterministic
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap()
}

/// A backup created by a schedule, `day` days after [`base_time`]
pub fn scheduled_backup(
    cluster: &str,
    schedule_job: &str,
    name: &str,
    state: BackupState,
    day: i64,
) -> XtraDBClusterBackup {
    XtraDBClusterBackup {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            creation_timestamp: Some(Time(base_time() + Duration::days(day))),
            labels: Some(BTreeMap::from([
                (CLUSTER_LABEL.to_string(), cluster.to_string()),
                (ANCESTOR_LABEL.to_string(), schedule_job.to_string()),
            ])),
            ..Default::default()
        },
        spec: XtraDBClusterBackupSpec {
            pxc_cluster: cluster.to_string(),
            storage_name: "fs".to_string(),
        },
        status: Some(XtraDBClusterBackupStatus {
            state,
            ..Default::default()
        }),
    }
}
