//! Fixtures shared by the controller's unit tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use kube::core::ObjectMeta;

use crate::client::MockClusterClient;
use crate::controller::context::{Context, ControllerConfig};
use crate::controller::crash_recovery::CRASH_BORDER;
use crate::controller::status::{ComponentReport, PodObservation};
use crate::crd::{PxcSpec, VolumeSpec, XtraDBCluster, XtraDBClusterSpec};
use crate::exec::MockPodExecutor;
use crate::resources::common::REVISION_HASH_LABEL;

pub const NAMESPACE: &str = "ns";

pub fn cluster_fixture(name: &str, size: i32) -> XtraDBCluster {
    let mut cluster = XtraDBCluster::new(
        name,
        XtraDBClusterSpec {
            pxc: PxcSpec {
                size,
                image: "percona/percona-xtradb-cluster:8.0".to_string(),
                auto_recovery: true,
                volume_spec: VolumeSpec {
                    storage_class: Some("standard".to_string()),
                    storage: "10Gi".to_string(),
                },
            },
            haproxy: None,
            proxysql: None,
            pause: false,
            backup: None,
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.uid = Some(format!("{}-uid", name));
    cluster.metadata.generation = Some(1);
    cluster.metadata.resource_version = Some("1".to_string());
    cluster
}

/// Database report with every pod running; `ready` lists ordinals counted ready
pub fn report_fixture(name: &str, size: i32, ready: &[i32]) -> ComponentReport {
    let pods = (0..size)
        .map(|i| PodObservation {
            name: format!("{}-pxc-{}", name, i),
            running: true,
            ready: ready.contains(&i),
            ..Default::default()
        })
        .collect();
    ComponentReport { pods }
}

/// Running pod on template revision `revision`
pub fn pod_fixture(name: &str, containers_ready: bool, revision: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                REVISION_HASH_LABEL.to_string(),
                revision.to_string(),
            )])),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "ContainersReady".to_string(),
                status: if containers_ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// StatefulSet whose pods are all on `update_revision`
pub fn statefulset_fixture(name: &str, replicas: i32, update_revision: &str) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        status: Some(StatefulSetStatus {
            replicas,
            updated_replicas: Some(replicas),
            current_revision: Some(update_revision.to_string()),
            update_revision: Some(update_revision.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Log tail a database node prints after a full cluster crash
pub fn crash_banner(seqno: &str) -> String {
    format!(
        "{b}\nYou have the situation of a full PXC cluster crash. In order to restore your PXC cluster, please check the log\n\
         from all pods/nodes to find the node with the most recent data (the one with the highest sequence number (seqno).\n\
         It is db-pxc-0 node with sequence number (seqno): {seqno}\n\
         Cluster will recover automatically from the crash now.\n\
         If you have set spec.pxc.autoRecovery to false, run the following command to recover manually from this node:\n\
         kubectl -n ns exec db-pxc-0 -c pxc -- sh -c 'kill -s USR1 1'\n{b}\n",
        b = CRASH_BORDER,
        seqno = seqno
    )
}

pub fn test_context(client: MockClusterClient, executor: MockPodExecutor) -> Context {
    let config = ControllerConfig {
        recovery_settle: Duration::ZERO,
        ..Default::default()
    };
    Context::with_collaborators(Arc::new(client), Arc::new(executor), config, None)
}
