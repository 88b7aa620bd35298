//! Common naming and labelling for objects belonging to an XtraDBCluster
//!
//! Labels are the only join key other tooling has to discover objects the
//! operator created, so every builder goes through these helpers.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::XtraDBCluster;

/// API version for XtraDBCluster CRD
pub const API_VERSION: &str = "xtradb.example.com/v1";

/// Kind for XtraDBCluster CRD
pub const KIND: &str = "XtraDBCluster";

/// Operator field manager name
pub const FIELD_MANAGER: &str = "xtradb-operator";

/// Label linking an object to the cluster that owns it
pub const CLUSTER_LABEL: &str = "xtradb.example.com/cluster";

/// Label linking a CronJob or backup record to its schedule
pub const ANCESTOR_LABEL: &str = "xtradb.example.com/ancestor-schedule";

/// Label describing how a backup record was created
pub const BACKUP_TYPE_LABEL: &str = "xtradb.example.com/backup-type";

pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Pod label set by the StatefulSet controller to the pod's template revision
pub const REVISION_HASH_LABEL: &str = "controller-revision-hash";

/// Name of the data volume claim template in the database StatefulSet
pub const DATA_VOLUME_NAME: &str = "datadir";

/// Generate an owner reference for an XtraDBCluster
///
/// Child objects carrying it are garbage collected with the cluster.
pub fn owner_reference(cluster: &XtraDBCluster) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels shared by every pod of one component
pub fn component_labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "app.kubernetes.io/name".to_string(),
            "xtradb-cluster".to_string(),
        ),
        (INSTANCE_LABEL.to_string(), cluster_name.to_string()),
        (COMPONENT_LABEL.to_string(), component.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        (
            "app.kubernetes.io/part-of".to_string(),
            "xtradb-cluster".to_string(),
        ),
    ])
}

/// Labels on objects the operator creates on behalf of a backup schedule
pub fn schedule_labels(cluster_name: &str, schedule_job: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster_name.to_string()),
        (ANCESTOR_LABEL.to_string(), schedule_job.to_string()),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
    ])
}

/// Render a label map as a `key=value,...` selector
pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Name of a component's StatefulSet
pub fn statefulset_name(cluster_name: &str, component: &str) -> String {
    format!("{}-{}", cluster_name, component)
}

/// Name of the pod with the given ordinal in a StatefulSet
pub fn pod_name(statefulset: &str, ordinal: i32) -> String {
    format!("{}-{}", statefulset, ordinal)
}

/// Name of the data volume claim belonging to a pod
pub fn data_claim_name(pod: &str) -> String {
    format!("{}-{}", DATA_VOLUME_NAME, pod)
}

/// Trim a generated name to `max` characters without leaving a trailing separator
pub fn truncate_name(name: &str, max: usize) -> String {
    let mut trimmed: String = name.chars().take(max).collect();
    while trimmed.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        trimmed.pop();
    }
    trimmed
}
