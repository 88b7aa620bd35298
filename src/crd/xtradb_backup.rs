use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// XtraDBClusterBackup records one backup run of an XtraDBCluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "xtradb.example.com",
    version = "v1",
    kind = "XtraDBClusterBackup",
    plural = "xtradbclusterbackups",
    shortname = "pxc-backup",
    namespaced,
    status = "XtraDBClusterBackupStatus",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.pxcCluster"}"#,
    printcolumn = r#"{"name":"Storage", "type":"string", "jsonPath":".spec.storageName"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct XtraDBClusterBackupSpec {
    /// Name of the XtraDBCluster being backed up
    pub pxc_cluster: String,

    /// Key into the cluster's `backup.storages`
    pub storage_name: String,
}

/// Status of a backup run
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct XtraDBClusterBackupStatus {
    #[serde(default)]
    pub state: BackupState,

    /// Completion time (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,

    /// Destination path of the backup inside the storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

/// Backup lifecycle; `Succeeded` and `Failed` are terminal
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum BackupState {
    #[default]
    New,
    Starting,
    Running,
    Failed,
    Succeeded,
}

impl XtraDBClusterBackup {
    pub fn state(&self) -> BackupState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}
