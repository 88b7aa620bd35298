//! Health server for Kubernetes probes and Prometheus metrics
//!
//! - `/healthz` liveness
//! - `/readyz` readiness, flipped once the controller is running
//! - `/metrics` Prometheus text format

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

pub const HEALTH_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

impl ClusterLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ComponentLabels {
    pub namespace: String,
    pub name: String,
    pub component: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub namespace: String,
    pub name: String,
    pub outcome: String,
}

pub struct Metrics {
    pub reconciliations_total: Family<ClusterLabels, Counter>,
    pub reconciliation_errors_total: Family<ClusterLabels, Counter>,
    pub reconcile_duration_seconds: Family<ClusterLabels, Histogram>,
    pub component_pods_desired: Family<ComponentLabels, Gauge>,
    pub component_pods_ready: Family<ComponentLabels, Gauge>,
    pub crash_recoveries_total: Family<ClusterLabels, Counter>,
    pub backups_pruned_total: Family<ClusterLabels, Counter>,
    /// Resize transitions: started, completed, failed
    pub volume_resizes_total: Family<OutcomeLabels, Counter>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("xtradb_operator");

        let reconciliations_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Total number of reconcile passes",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Total number of failed reconcile passes",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ClusterLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Duration of a reconcile pass in seconds",
            reconcile_duration_seconds.clone(),
        );

        let component_pods_desired = Family::<ComponentLabels, Gauge>::default();
        registry.register(
            "component_pods_desired",
            "Declared pod count per cluster component",
            component_pods_desired.clone(),
        );

        let component_pods_ready = Family::<ComponentLabels, Gauge>::default();
        registry.register(
            "component_pods_ready",
            "Ready pod count per cluster component",
            component_pods_ready.clone(),
        );

        let crash_recoveries_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "crash_recoveries",
            "Full-cluster crash recoveries signalled",
            crash_recoveries_total.clone(),
        );

        let backups_pruned_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "backups_pruned",
            "Scheduled backups deleted by retention",
            backups_pruned_total.clone(),
        );

        let volume_resizes_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "volume_resizes",
            "Data volume resize transitions by outcome",
            volume_resizes_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            component_pods_desired,
            component_pods_ready,
            crash_recoveries_total,
            backups_pruned_total,
            volume_resizes_total,
            registry,
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ClusterLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc();
    }

    pub fn set_component_pods(
        &self,
        namespace: &str,
        name: &str,
        component: &str,
        desired: i64,
        ready: i64,
    ) {
        let labels = ComponentLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            component: component.to_string(),
        };
        self.component_pods_desired
            .get_or_create(&labels)
            .set(desired);
        self.component_pods_ready.get_or_create(&labels).set(ready);
    }

    pub fn record_crash_recovery(&self, namespace: &str, name: &str) {
        self.crash_recoveries_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc();
    }

    pub fn record_backups_pruned(&self, namespace: &str, name: &str, count: u64) {
        self.backups_pruned_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc_by(count);
    }

    pub fn record_volume_resize(&self, namespace: &str, name: &str, outcome: &str) {
        let labels = OutcomeLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            outcome: outcome.to_string(),
        };
        self.volume_resizes_total.get_or_create(&labels).inc();
    }

    /// Prometheus text; empty if encoding fails
    fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        buffer
    }
}

pub struct HealthState {
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Unix seconds of the last successful pass
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub fn touch(&self, unix_secs: u64) {
        self.last_reconcile.store(unix_secs, Ordering::Relaxed);
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = TcpListener::bind(HEALTH_ADDR).await?;
    tracing::info!(addr = HEALTH_ADDR, "Health server listening");

    axum::serve(listener, app).await
}
