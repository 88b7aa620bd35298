//! Cluster API access used by the reconciliation engine
//!
//! Every read and write the controller performs goes through [`ClusterClient`],
//! so component logic can be exercised against mocks in tests while the
//! [`KubeClusterClient`] implementation talks to the API server.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::api::events::v1::Event;
use kube::api::{DeleteParams, ListParams, PostParams, PropagationPolicy};
use kube::{Api, Client, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::crd::{XtraDBCluster, XtraDBClusterBackup};

/// Trait abstracting Kubernetes API operations for an XtraDBCluster
///
/// All methods are scoped to a namespace. `get_*` methods return `Ok(None)`
/// when the object does not exist; deletes of missing objects succeed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch the latest version of the cluster resource
    async fn get_cluster(&self, ns: &str, name: &str) -> Result<Option<XtraDBCluster>>;

    /// Replace the cluster resource (spec and metadata), honouring its resourceVersion
    async fn replace_cluster(&self, ns: &str, cluster: &XtraDBCluster) -> Result<XtraDBCluster>;

    /// Replace the status subresource, honouring the resourceVersion
    async fn replace_cluster_status(
        &self,
        ns: &str,
        cluster: &XtraDBCluster,
    ) -> Result<XtraDBCluster>;

    async fn list_pods(&self, ns: &str, selector: &str) -> Result<Vec<Pod>>;

    async fn get_pod(&self, ns: &str, name: &str) -> Result<Option<Pod>>;

    async fn get_statefulset(&self, ns: &str, name: &str) -> Result<Option<StatefulSet>>;

    /// Delete a StatefulSet while leaving its pods and claims in place
    async fn delete_statefulset_orphan(&self, ns: &str, name: &str) -> Result<()>;

    async fn list_pvcs(&self, ns: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>>;

    async fn replace_pvc(
        &self,
        ns: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    /// Events whose `regarding` object has the given name
    async fn list_events_for(&self, ns: &str, object_name: &str) -> Result<Vec<Event>>;

    async fn list_cronjobs(&self, ns: &str, selector: &str) -> Result<Vec<CronJob>>;

    async fn get_cronjob(&self, ns: &str, name: &str) -> Result<Option<CronJob>>;

    async fn create_cronjob(&self, ns: &str, cronjob: &CronJob) -> Result<CronJob>;

    async fn replace_cronjob(&self, ns: &str, cronjob: &CronJob) -> Result<CronJob>;

    async fn delete_cronjob(&self, ns: &str, name: &str) -> Result<()>;

    async fn list_backups(&self, ns: &str, selector: &str) -> Result<Vec<XtraDBClusterBackup>>;

    async fn delete_backup(&self, ns: &str, name: &str) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, ns: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }
}

/// Treat a 404 on delete as success
fn ignore_not_found<T>(result: std::result::Result<T, kube::Error>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_cluster(&self, ns: &str, name: &str) -> Result<Option<XtraDBCluster>> {
        Ok(self.api::<XtraDBCluster>(ns).get_opt(name).await?)
    }

    async fn replace_cluster(&self, ns: &str, cluster: &XtraDBCluster) -> Result<XtraDBCluster> {
        let api = self.api::<XtraDBCluster>(ns);
        Ok(api
            .replace(&cluster.name_any(), &PostParams::default(), cluster)
            .await?)
    }

    async fn replace_cluster_status(
        &self,
        ns: &str,
        cluster: &XtraDBCluster,
    ) -> Result<XtraDBCluster> {
        let api = self.api::<XtraDBCluster>(ns);
        let body = serde_json::to_vec(cluster)?;
        Ok(api
            .replace_status(&cluster.name_any(), &PostParams::default(), body)
            .await?)
    }

    async fn list_pods(&self, ns: &str, selector: &str) -> Result<Vec<Pod>> {
        let pods = self
            .api::<Pod>(ns)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(pods.items)
    }

    async fn get_pod(&self, ns: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self.api::<Pod>(ns).get_opt(name).await?)
    }

    async fn get_statefulset(&self, ns: &str, name: &str) -> Result<Option<StatefulSet>> {
        Ok(self.api::<StatefulSet>(ns).get_opt(name).await?)
    }

    async fn delete_statefulset_orphan(&self, ns: &str, name: &str) -> Result<()> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Orphan),
            ..Default::default()
        };
        ignore_not_found(self.api::<StatefulSet>(ns).delete(name, &params).await)
    }

    async fn list_pvcs(&self, ns: &str, selector: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let pvcs = self
            .api::<PersistentVolumeClaim>(ns)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(pvcs.items)
    }

    async fn replace_pvc(
        &self,
        ns: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let api = self.api::<PersistentVolumeClaim>(ns);
        Ok(api.replace(&pvc.name_any(), &PostParams::default(), pvc).await?)
    }

    async fn list_events_for(&self, ns: &str, object_name: &str) -> Result<Vec<Event>> {
        let selector = format!("regarding.name={}", object_name);
        let events = self
            .api::<Event>(ns)
            .list(&ListParams::default().fields(&selector))
            .await?;
        Ok(events.items)
    }

    async fn list_cronjobs(&self, ns: &str, selector: &str) -> Result<Vec<CronJob>> {
        let jobs = self
            .api::<CronJob>(ns)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(jobs.items)
    }

    async fn get_cronjob(&self, ns: &str, name: &str) -> Result<Option<CronJob>> {
        Ok(self.api::<CronJob>(ns).get_opt(name).await?)
    }

    async fn create_cronjob(&self, ns: &str, cronjob: &CronJob) -> Result<CronJob> {
        Ok(self
            .api::<CronJob>(ns)
            .create(&PostParams::default(), cronjob)
            .await?)
    }

    async fn replace_cronjob(&self, ns: &str, cronjob: &CronJob) -> Result<CronJob> {
        let api = self.api::<CronJob>(ns);
        Ok(api
            .replace(&cronjob.name_any(), &PostParams::default(), cronjob)
            .await?)
    }

    async fn delete_cronjob(&self, ns: &str, name: &str) -> Result<()> {
        ignore_not_found(
            self.api::<CronJob>(ns)
                .delete(name, &DeleteParams::background())
                .await,
        )
    }

    async fn list_backups(&self, ns: &str, selector: &str) -> Result<Vec<XtraDBClusterBackup>> {
        let backups = self
            .api::<XtraDBClusterBackup>(ns)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(backups.items)
    }

    async fn delete_backup(&self, ns: &str, name: &str) -> Result<()> {
        ignore_not_found(
            self.api::<XtraDBClusterBackup>(ns)
                .delete(name, &DeleteParams::default())
                .await,
        )
    }
}
