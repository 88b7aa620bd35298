use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation marking a PVC resize that has been started but not yet finished.
///
/// The value is the RFC3339 timestamp at which the resize was started.
pub const RESIZE_IN_PROGRESS_ANNOTATION: &str = "xtradb.example.com/pvc-resize-in-progress";

/// XtraDBCluster is the Schema for the xtradbclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "xtradb.example.com",
    version = "v1",
    kind = "XtraDBCluster",
    plural = "xtradbclusters",
    shortname = "pxc",
    namespaced,
    status = "XtraDBClusterStatus",
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".status.host"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"PXC", "type":"integer", "jsonPath":".status.pxc.ready"}"#,
    printcolumn = r#"{"name":"HAProxy", "type":"integer", "jsonPath":".status.haproxy.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct XtraDBClusterSpec {
    /// Database nodes (Galera members)
    pub pxc: PxcSpec,

    /// HAProxy tier in front of the database nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haproxy: Option<ProxySpec>,

    /// ProxySQL tier in front of the database nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxysql: Option<ProxySpec>,

    /// Pause the cluster: all tiers are scaled down to zero
    #[serde(default)]
    pub pause: bool,

    /// Scheduled backups and their storage destinations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSpec>,
}

/// Database node configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PxcSpec {
    /// Number of Galera members
    #[serde(default = "default_pxc_size")]
    pub size: i32,

    /// Database container image
    pub image: String,

    /// Automatically recover from a full cluster crash
    #[serde(default = "default_auto_recovery")]
    pub auto_recovery: bool,

    /// Data volume configuration
    pub volume_spec: VolumeSpec,
}

fn default_pxc_size() -> i32 {
    3
}

fn default_auto_recovery() -> bool {
    true
}

/// Persistent data volume configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Requested capacity of each data volume (e.g., "10Gi", "100G")
    pub storage: String,
}

/// Proxy tier configuration (HAProxy or ProxySQL)
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    /// Whether the tier is deployed
    #[serde(default)]
    pub enabled: bool,

    /// Number of proxy pods
    #[serde(default = "default_proxy_size")]
    pub size: i32,

    /// Proxy container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

fn default_proxy_size() -> i32 {
    2
}

/// Backup configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Image running a single backup
    pub image: String,

    /// Named backup destinations
    #[serde(default)]
    pub storages: BTreeMap<String, BackupStorageSpec>,

    /// Scheduled backups
    #[serde(default)]
    pub schedule: Vec<BackupScheduleSpec>,
}

/// A backup destination
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum BackupStorageSpec {
    /// S3 or S3-compatible object storage
    #[serde(rename = "s3")]
    S3 {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint_url: Option<String>,
        credentials_secret: String,
    },
    /// Azure Blob Storage
    #[serde(rename = "azure")]
    Azure {
        container: String,
        credentials_secret: String,
    },
    /// A PersistentVolumeClaim in the cluster namespace
    #[serde(rename = "filesystem")]
    Filesystem { claim_name: String },
}

impl BackupStorageSpec {
    /// Storage type as passed to the backup job
    pub fn storage_type(&self) -> &'static str {
        match self {
            BackupStorageSpec::S3 { .. } => "s3",
            BackupStorageSpec::Azure { .. } => "azure",
            BackupStorageSpec::Filesystem { .. } => "filesystem",
        }
    }
}

/// A declarative backup schedule
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupScheduleSpec {
    /// Schedule name, unique within the cluster
    pub name: String,

    /// Cron expression
    pub schedule: String,

    /// Number of succeeded backups to retain (0 keeps everything)
    #[serde(default)]
    pub keep: u32,

    /// Key into `backup.storages`
    pub storage_name: String,
}

/// Lifecycle state of a cluster component, and of the cluster as a whole
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum AppState {
    #[default]
    #[serde(rename = "initializing")]
    Init,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "stopping")]
    Stopping,
    #[serde(rename = "paused")]
    Paused,
}

impl AppState {
    /// Rank used when folding component states together; higher wins.
    pub fn precedence(self) -> u8 {
        match self {
            AppState::Ready => 0,
            AppState::Init => 1,
            AppState::Paused => 2,
            AppState::Stopping => 3,
            AppState::Error => 4,
        }
    }

    /// The worse of two states
    pub fn join(self, other: AppState) -> AppState {
        if other.precedence() > self.precedence() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Init => write!(f, "initializing"),
            AppState::Ready => write!(f, "ready"),
            AppState::Error => write!(f, "error"),
            AppState::Stopping => write!(f, "stopping"),
            AppState::Paused => write!(f, "paused"),
        }
    }
}

/// Observed state of one component
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Declared number of pods
    #[serde(default)]
    pub size: i32,

    /// Pods counted as ready
    #[serde(default)]
    pub ready: i32,

    #[serde(default)]
    pub state: AppState,

    /// Human-readable details (waiting containers, scheduling failures)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Status of the XtraDBCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct XtraDBClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxc: Option<ComponentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haproxy: Option<ComponentStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxysql: Option<ComponentStatus>,

    /// Overall cluster state
    #[serde(default)]
    pub state: AppState,

    /// Endpoint clients should connect to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Human-readable problems observed during the last pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,

    /// State transition history, most recent last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// A recorded cluster state transition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// State the cluster transitioned into
    #[serde(rename = "type")]
    pub type_: AppState,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    pub last_transition_time: String,
}

impl XtraDBCluster {
    /// Start time of an in-flight PVC resize, if the annotation is present
    pub fn resize_started_at(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(RESIZE_IN_PROGRESS_ANNOTATION))
            .map(String::as_str)
    }

    pub fn haproxy_enabled(&self) -> bool {
        self.spec.haproxy.as_ref().is_some_and(|p| p.enabled)
    }

    pub fn proxysql_enabled(&self) -> bool {
        self.spec.proxysql.as_ref().is_some_and(|p| p.enabled)
    }
}
