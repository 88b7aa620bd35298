use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kube::Client;
use tracing::warn;

use crate::client::{ClusterClient, KubeClusterClient};
use crate::controller::backup_schedule::ScheduleRegistry;
use crate::exec::{KubePodExecutor, PodExecutor};
use crate::health::HealthState;

/// Runtime settings for the reconciliation engine
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches cluster-wide
    pub watch_namespace: Option<String>,
    /// Re-check interval applied after every successful pass
    pub reconcile_interval: Duration,
    /// Pause after signalling a recovery leader before the pass returns
    pub recovery_settle: Duration,
    /// Attempts for a conflicting status or spec write
    pub status_write_retries: u32,
    /// Service account the backup CronJob pods run as
    pub backup_service_account: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            reconcile_interval: Duration::from_secs(5),
            recovery_settle: Duration::from_secs(10),
            status_write_retries: 5,
            backup_service_account: None,
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(variable = name, value = %raw, "Ignoring invalid duration");
                default
            }
        },
        Err(_) => default,
    }
}

impl ControllerConfig {
    /// Read settings from the process environment, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let status_write_retries = env::var("STATUS_WRITE_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.status_write_retries);

        Self {
            watch_namespace: env::var("WATCH_NAMESPACE").ok().filter(|s| !s.is_empty()),
            reconcile_interval: env_secs("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval),
            recovery_settle: env_secs("RECOVERY_SETTLE_SECS", defaults.recovery_settle),
            status_write_retries,
            backup_service_account: env::var("BACKUP_SERVICE_ACCOUNT")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }
}

/// Shared context for the controller
pub struct Context {
    /// Kubernetes API access
    pub client: Arc<dyn ClusterClient>,
    /// Pod exec and log access
    pub executor: Arc<dyn PodExecutor>,
    pub config: ControllerConfig,
    /// Backup schedule registries keyed by `namespace/name`
    ///
    /// Only touched between awaits: a pass checks its entry out and returns it.
    pub schedules: Mutex<HashMap<String, ScheduleRegistry>>,
    /// Consecutive failed passes per `namespace/name`, drives error backoff
    failures: Mutex<HashMap<String, u32>>,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        client: Client,
        config: ControllerConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self::with_collaborators(
            Arc::new(KubeClusterClient::new(client.clone())),
            Arc::new(KubePodExecutor::new(client)),
            config,
            health_state,
        )
    }

    pub fn with_collaborators(
        client: Arc<dyn ClusterClient>,
        executor: Arc<dyn PodExecutor>,
        config: ControllerConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            executor,
            config,
            schedules: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            health_state,
        }
    }

    /// Take the schedule registry of one cluster out of the shared map
    pub fn checkout_schedules(&self, key: &str) -> ScheduleRegistry {
        match self.schedules.lock() {
            Ok(mut map) => map.remove(key).unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().remove(key).unwrap_or_default(),
        }
    }

    /// Return a registry taken with [`Context::checkout_schedules`]
    pub fn checkin_schedules(&self, key: &str, registry: ScheduleRegistry) {
        match self.schedules.lock() {
            Ok(mut map) => map.insert(key.to_string(), registry),
            Err(poisoned) => poisoned.into_inner().insert(key.to_string(), registry),
        };
    }

    /// Forget everything held for a deleted cluster
    pub fn drop_schedules(&self, key: &str) {
        match self.schedules.lock() {
            Ok(mut map) => map.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
        self.clear_failures(key);
    }

    /// Count a failed pass; returns how many failures preceded it
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut map = match self.failures.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = map.entry(key.to_string()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn clear_failures(&self, key: &str) {
        match self.failures.lock() {
            Ok(mut map) => map.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
    }
}
