//! Live resize of database data volumes
//!
//! A resize is started by stamping [`RESIZE_IN_PROGRESS_ANNOTATION`] on the
//! cluster and raising the request of every data claim. Later passes watch the
//! claims until they all report the new capacity, then delete the StatefulSet
//! with orphan propagation so it is recreated with the larger claim template.
//! Hard failures roll the cluster's requested size back to the configured one.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, VolumeResourceRequirements};
use k8s_openapi::api::events::v1::Event;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result, retry_on_conflict};
use crate::controller::status::{DatabaseNodes, StatefulComponent};
use crate::crd::{RESIZE_IN_PROGRESS_ANNOTATION, XtraDBCluster};
use crate::resources::common::{DATA_VOLUME_NAME, data_claim_name, selector};
use crate::resources::quantity::{aligned_bytes, quantity_bytes, round_up, to_quantity};

const STORAGE: &str = "storage";

/// Resize progress as recorded on the cluster resource
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResizeState {
    NotStarted,
    InProgress(DateTime<Utc>),
    Failed(String),
}

impl ResizeState {
    /// Rebuild the state from the annotation; nothing is kept between passes
    pub fn from_cluster(cluster: &XtraDBCluster) -> Result<Self> {
        match cluster.resize_started_at() {
            None => Ok(ResizeState::NotStarted),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| ResizeState::InProgress(t.with_timezone(&Utc)))
                .map_err(|e| Error::AnnotationError(raw.to_string(), e)),
        }
    }

    /// Fold per-claim progress into the next state. A hard failure only wins
    /// once no other claim is still moving.
    pub fn advance(self, claims: &[(String, ClaimProgress)]) -> Self {
        if claims.iter().any(|(_, p)| *p == ClaimProgress::InProgress) {
            return self;
        }
        let failures: Vec<String> = claims
            .iter()
            .filter_map(|(name, p)| match p {
                ClaimProgress::Failed(note) => Some(format!("{}: {}", name, note)),
                _ => None,
            })
            .collect();
        if failures.is_empty() {
            self
        } else {
            ResizeState::Failed(failures.join("; "))
        }
    }
}

/// Progress of one claim during a resize
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimProgress {
    Done,
    InProgress,
    Failed(String),
    /// No signal yet either way
    Pending,
}

/// What a volume pass did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    NoChange,
    Started { claims: usize },
    Waiting,
    Completed,
}

fn capacity(pvc: &PersistentVolumeClaim) -> Option<&Quantity> {
    pvc.status.as_ref()?.capacity.as_ref()?.get(STORAGE)
}

fn capacity_bytes(pvc: &PersistentVolumeClaim) -> Result<Option<u64>> {
    capacity(pvc)
        .map(|q| quantity_bytes(q).map(round_up))
        .transpose()
}

fn event_time(event: &Event) -> Option<DateTime<Utc>> {
    event
        .event_time
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.deprecated_first_timestamp.as_ref().map(|t| t.0))
}

/// Classify a claim from its capacity, conditions and events recorded after `started_at`
pub fn claim_progress(
    pvc: &PersistentVolumeClaim,
    requested: u64,
    events: &[Event],
    started_at: DateTime<Utc>,
) -> Result<ClaimProgress> {
    if capacity_bytes(pvc)? == Some(requested) {
        return Ok(ClaimProgress::Done);
    }

    let mut progress = ClaimProgress::Pending;

    let resizing = pvc
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.status == "True"
                    && (c.type_ == "Resizing" || c.type_ == "FileSystemResizePending")
            })
        });
    if resizing {
        progress = ClaimProgress::InProgress;
    }

    for event in events {
        if event_time(event).is_none_or(|t| t < started_at) {
            continue;
        }
        let note = event.note.clone().unwrap_or_default();
        match event.reason.as_deref() {
            Some("VolumeResizeFailed") => return Ok(ClaimProgress::Failed(note)),
            Some("Resizing" | "ExternalExpanding" | "FileSystemResizeRequired") => {
                progress = ClaimProgress::InProgress;
            }
            _ => {}
        }
    }
    Ok(progress)
}

/// Whether a claim update was rejected for a reason retrying cannot fix
fn is_hard_update_failure(err: &Error) -> bool {
    let message = err.to_string();
    message.contains("exceeded quota")
        || message.contains("the storageclass that provisions the pvc must support resize")
}

/// Get-modify-replace of the cluster resource, retried on conflict
async fn modify_cluster<F>(ctx: &Context, ns: &str, name: &str, mutate: F) -> Result<()>
where
    F: Fn(&mut XtraDBCluster) -> bool,
{
    retry_on_conflict(ctx.config.status_write_retries, "cluster update", || {
        let mutate = &mutate;
        async move {
            let Some(mut latest) = ctx.client.get_cluster(ns, name).await? else {
                return Err(Error::NotFound(format!("{}/{}", ns, name)));
            };
            if !mutate(&mut latest) {
                return Ok(());
            }
            ctx.client.replace_cluster(ns, &latest).await?;
            Ok(())
        }
    })
    .await
}

async fn annotate(ctx: &Context, ns: &str, name: &str, started_at: &str) -> Result<()> {
    modify_cluster(ctx, ns, name, |c| {
        c.annotations_mut()
            .insert(RESIZE_IN_PROGRESS_ANNOTATION.to_string(), started_at.to_string());
        true
    })
    .await
}

async fn deannotate(ctx: &Context, ns: &str, name: &str) -> Result<()> {
    modify_cluster(ctx, ns, name, |c| {
        c.annotations_mut()
            .remove(RESIZE_IN_PROGRESS_ANNOTATION)
            .is_some()
    })
    .await
}

async fn revert_storage(ctx: &Context, ns: &str, name: &str, configured: &Quantity) -> Result<()> {
    info!(cluster = %name, size = %configured.0, "Reverting requested storage to configured size");
    modify_cluster(ctx, ns, name, |c| {
        if c.spec.pxc.volume_spec.storage == configured.0 {
            return false;
        }
        c.spec.pxc.volume_spec.storage = configured.0.clone();
        true
    })
    .await
}

/// Roll back after a hard failure; returns the error to surface
async fn handle_failure(
    ctx: &Context,
    ns: &str,
    name: &str,
    configured: &Quantity,
    reason: String,
) -> Error {
    if let Some(ref health) = ctx.health_state {
        health.metrics.record_volume_resize(ns, name, "failed");
    }
    if let Err(e) = revert_storage(ctx, ns, name, configured).await {
        return e;
    }
    if let Err(e) = deannotate(ctx, ns, name).await {
        return e;
    }
    Error::VolumeResizeError(reason)
}

/// Drive the data volumes of the database tier towards the requested capacity
pub async fn reconcile_volumes(ctx: &Context, cluster: &XtraDBCluster) -> Result<ResizeOutcome> {
    let ns = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = cluster.name_any();
    let nodes = DatabaseNodes::new(cluster);
    let sts_name = nodes.workload_set();
    let claim_prefix = format!("{}-{}-", DATA_VOLUME_NAME, sts_name);
    let label_selector = selector(&nodes.labels());

    let pvcs: Vec<PersistentVolumeClaim> = ctx
        .client
        .list_pvcs(&ns, &label_selector)
        .await?
        .into_iter()
        .filter(|pvc| pvc.name_any().starts_with(&claim_prefix))
        .collect();
    if pvcs.is_empty() {
        return Ok(ResizeOutcome::NoChange);
    }

    let pods: HashSet<String> = ctx
        .client
        .list_pods(&ns, &label_selector)
        .await?
        .iter()
        .map(|p| p.name_any())
        .collect();
    let claims: Vec<&PersistentVolumeClaim> = pvcs
        .iter()
        .filter(|pvc| pods.iter().any(|pod| data_claim_name(pod) == pvc.name_any()))
        .collect();
    if claims.is_empty() {
        return Ok(ResizeOutcome::NoChange);
    }

    // The smallest claim is the one a failed resize left behind
    let mut actual: Option<u64> = None;
    for pvc in &pvcs {
        if let Some(bytes) = capacity_bytes(pvc)? {
            actual = Some(actual.map_or(bytes, |a| a.min(bytes)));
        }
    }
    let Some(actual) = actual else {
        return Ok(ResizeOutcome::NoChange);
    };

    let Some(sts) = ctx.client.get_statefulset(&ns, &sts_name).await? else {
        return Ok(ResizeOutcome::NoChange);
    };
    let Some(configured) = sts
        .spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.as_ref())
        .and_then(|templates| templates.iter().find(|t| t.name_any() == DATA_VOLUME_NAME))
        .and_then(|t| t.spec.as_ref()?.resources.as_ref()?.requests.as_ref()?.get(STORAGE))
        .cloned()
    else {
        return Ok(ResizeOutcome::NoChange);
    };
    let configured_bytes = quantity_bytes(&configured).map(round_up)?;
    let requested = aligned_bytes(&cluster.spec.pxc.volume_spec.storage)?;

    let state = ResizeState::from_cluster(cluster)?;
    if let ResizeState::InProgress(started_at) = state {
        let mut progress = Vec::with_capacity(claims.len());
        for pvc in &claims {
            let pvc_name = pvc.name_any();
            let events = ctx.client.list_events_for(&ns, &pvc_name).await?;
            let claim = claim_progress(pvc, requested, &events, started_at)?;
            match &claim {
                ClaimProgress::Done => debug!(pvc = %pvc_name, "PVC resize finished"),
                ClaimProgress::InProgress => info!(pvc = %pvc_name, "PVC resize in progress"),
                ClaimProgress::Failed(note) => {
                    error!(pvc = %pvc_name, message = %note, "PVC resize failed")
                }
                ClaimProgress::Pending => {}
            }
            progress.push((pvc_name, claim));
        }

        if let ResizeState::Failed(reason) = state.advance(&progress) {
            return Err(handle_failure(ctx, &ns, &name, &configured, reason).await);
        }

        if progress.iter().all(|(_, p)| *p == ClaimProgress::Done) {
            info!(cluster = %name, statefulset = %sts_name, "All PVCs resized, recreating statefulset");
            ctx.client.delete_statefulset_orphan(&ns, &sts_name).await?;
            deannotate(ctx, &ns, &name).await?;
            if let Some(ref health) = ctx.health_state {
                health.metrics.record_volume_resize(&ns, &name, "completed");
            }
            return Ok(ResizeOutcome::Completed);
        }

        return Ok(ResizeOutcome::Waiting);
    }

    if requested < actual {
        revert_storage(ctx, &ns, &name, &configured).await?;
        return Err(Error::StorageShrinkError {
            requested: to_quantity(requested).0,
            actual: to_quantity(actual).0,
        });
    }

    if requested == configured_bytes || requested == actual {
        return Ok(ResizeOutcome::NoChange);
    }

    let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    annotate(ctx, &ns, &name, &started_at).await?;

    let target = to_quantity(requested);
    info!(
        cluster = %name,
        requested = %target.0,
        actual = %to_quantity(actual).0,
        claims = claims.len(),
        "Resizing PVCs"
    );

    let mut started = 0;
    for pvc in claims {
        let pvc_name = pvc.name_any();
        if capacity_bytes(pvc)? == Some(requested) {
            debug!(pvc = %pvc_name, "PVC already resized");
            continue;
        }

        let mut updated = pvc.clone();
        let spec = updated.spec.get_or_insert_with(Default::default);
        spec.resources
            .get_or_insert_with(VolumeResourceRequirements::default)
            .requests
            .get_or_insert_with(BTreeMap::new)
            .insert(STORAGE.to_string(), target.clone());

        if let Err(e) = ctx.client.replace_pvc(&ns, &updated).await {
            if is_hard_update_failure(&e) {
                warn!(pvc = %pvc_name, error = %e, "PVC resize rejected");
                return Err(handle_failure(ctx, &ns, &name, &configured, e.to_string()).await);
            }
            return Err(e);
        }
        info!(pvc = %pvc_name, requested = %target.0, "PVC resize started");
        started += 1;
    }

    if let Some(ref health) = ctx.health_state {
        health.metrics.record_volume_resize(&ns, &name, "started");
    }
    Ok(ResizeOutcome::Started { claims: started })
}
