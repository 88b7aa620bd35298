pub mod client;
pub mod controller;
pub mod crd;
pub mod exec;
pub mod health;
pub mod resources;

pub use controller::{BackoffConfig, Context, ControllerConfig, Error, Result, error_policy, reconcile};
pub use crd::{XtraDBCluster, XtraDBClusterBackup};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::CronJob;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the XtraDBCluster controller until its watch stream ends.
///
/// Watches clusters plus the StatefulSets and backup CronJobs they own, in
/// `config.watch_namespace` or cluster-wide.
pub async fn run_controller(
    client: Client,
    config: ControllerConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let namespace = namespace.as_deref();
    tracing::info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting controller for XtraDBCluster resources"
    );

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), config, health_state));

    let clusters: Api<XtraDBCluster> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let cronjobs: Api<CronJob> = scoped_api(client, namespace);

    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(clusters, watcher_config.clone())
        .owns(statefulsets, watcher_config.clone())
        .owns(cronjobs, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!(cluster = %obj.name, "Reconciled");
                }
                // Owned-object events can arrive after the cluster is gone
                Err(kube::runtime::controller::Error::ReconcilerFailed(err, obj))
                    if err.is_not_found() =>
                {
                    tracing::debug!(cluster = %obj.name, "Cluster no longer exists");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    tracing::error!("Controller stream ended unexpectedly");
}
