//! qdrant-operator - A Kubernetes operator for Qdrant vector database clusters.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Runs leader election (required for HA deployments)
//! - Starts the controller and health server

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use qdrant_operator::controller::context::LeaderGate;
use qdrant_operator::health::{HealthState, run_health_server};
use qdrant_operator::{Operator, OperatorConfig};

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = OperatorConfig::parse();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qdrant_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    info!("Starting qdrant-operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Get pod identity for leader election
    let pod_name = config.pod_name.clone().unwrap_or_else(|| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately (probes should work even as non-leader)
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let gate = if config.disable_leader_election {
        info!("Leader election disabled");
        Arc::new(LeaderGate::open())
    } else {
        let gate = Arc::new(LeaderGate::new());
        acquire_leadership(&client, &config, &pod_name, &gate).await;
        gate
    };

    // Start lease renewal background task
    let lease_renewal_handle = if config.disable_leader_election {
        None
    } else {
        Some(spawn_lease_renewal(
            client.clone(),
            &config,
            pod_name,
            gate.clone(),
        ))
    };

    let operator = Operator::new(
        client.clone(),
        &config,
        health_state.metrics.clone(),
        gate.clone(),
    )?;

    // Mark as ready once we start the controller
    health_state.set_ready(true).await;

    let controller_handle = tokio::spawn(operator.clone().run());

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Lease renewal task only exits via process::exit() or panic
        // so this branch is only reached on panic
        Err(e) = async {
            match lease_renewal_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            error!("Lease renewal task panicked: {}", e);
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready to stop receiving new work
            health_state.set_ready(false).await;
            operator.shutdown();
            info!("Stopped scheduling new reconciles");

            // Give in-flight reconciliations time to complete
            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!(
                active = operator.scheduler.active_count(),
                "Grace period complete, shutting down"
            );
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn lease_lock(client: Client, config: &OperatorConfig, holder_id: String) -> LeaseLock {
    LeaseLock::new(
        client,
        &config.pod_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: config.lease_name.clone(),
            lease_ttl: config.lease_ttl(),
        },
    )
}

/// Block until this instance holds the lease, then open the gate.
async fn acquire_leadership(
    client: &Client,
    config: &OperatorConfig,
    pod_name: &str,
    gate: &LeaderGate,
) {
    info!(
        holder_id = %pod_name,
        namespace = %config.pod_namespace,
        lease_name = %config.lease_name,
        "Initializing leader election"
    );
    let lock = lease_lock(client.clone(), config, pod_name.to_string());

    info!("Waiting to acquire leadership...");
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) => {
                if result.acquired_lease {
                    info!("Acquired leadership");
                    gate.set_leader(true);
                    return;
                }
                info!("Another instance is leader, waiting...");
            }
            Err(e) => {
                warn!("Failed to acquire lease: {}, retrying...", e);
            }
        }
        tokio::time::sleep(config.lease_renew_interval()).await;
    }
}

/// Renew the lease forever. Losing it closes the gate and exits so
/// Kubernetes restarts us and we re-enter election.
fn spawn_lease_renewal(
    client: Client,
    config: &OperatorConfig,
    pod_name: String,
    gate: Arc<LeaderGate>,
) -> tokio::task::JoinHandle<()> {
    let lock = lease_lock(client, config, pod_name);
    let interval = config.lease_renew_interval();

    #[allow(clippy::exit)]
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            match lock.try_acquire_or_renew().await {
                Ok(result) => {
                    if !result.acquired_lease {
                        error!("Lost leadership! Shutting down...");
                        gate.set_leader(false);
                        std::process::exit(1);
                    }
                }
                Err(e) => {
                    error!("Failed to renew lease: {}. Shutting down...", e);
                    gate.set_leader(false);
                    std::process::exit(1);
                }
            }
        }
    })
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
