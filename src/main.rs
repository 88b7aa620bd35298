use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use xtradb_operator::controller::ControllerConfig;
use xtradb_operator::health::{HealthState, run_health_server};
use xtradb_operator::run_controller;

const LEASE_NAME: &str = "xtradb-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to in-flight passes after SIGTERM
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

fn lease_lock(client: Client, namespace: &str, holder_id: String) -> LeaseLock {
    LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id,
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A provider may already be installed when embedded in tests
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("xtradb_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    let config = ControllerConfig::from_env();
    info!(
        namespace = config.watch_namespace.as_deref().unwrap_or("cluster-wide"),
        interval_secs = config.reconcile_interval.as_secs(),
        "Starting xtradb-operator"
    );

    let client = Client::try_default().await?;

    let holder_id = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let lease_namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    let health_state = Arc::new(HealthState::new());

    // Probes are served before leadership is settled
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!(error = %e, "Health server failed");
            }
        })
    };

    let lock = lease_lock(client.clone(), &lease_namespace, holder_id.clone());
    info!(holder_id = %holder_id, lease = LEASE_NAME, "Waiting to acquire leadership");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                break;
            }
            Ok(_) => info!("Another instance is leader, waiting"),
            Err(e) => warn!(error = %e, "Failed to acquire lease, retrying"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }

    // Losing the lease exits the process so the pod rejoins the election
    let renewal_handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
            match lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Lost leadership, exiting");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(error = %e, "Failed to renew lease, exiting");
                    std::process::exit(1);
                }
            }
        }
    });

    let controller_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            run_controller(client, config, Some(health_state)).await;
        })
    };

    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller task panicked");
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!(error = %e, "Health server task panicked");
            }
        }
        Err(e) = renewal_handle => {
            error!(error = %e, "Lease renewal task panicked");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            health_state.set_ready(false).await;
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
