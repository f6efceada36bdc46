use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use overcommit_operator::config::OperatorConfig;
use overcommit_operator::controller::KubeStore;
use overcommit_operator::events::KubeEventPublisher;
use overcommit_operator::health::{HealthState, Metrics, run_health_server};
use overcommit_operator::leader::LeaseLock;
use overcommit_operator::{
    AdmissionEngine, Context, ValidationEngine, WebhookState, run_class_controller,
    run_cluster_controller, run_webhook_server,
};

/// Lease configuration
const LEASE_NAME: &str = "overcommit-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Grace period for in-flight reconciliations to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

/// Reporting component on published Events
const EVENT_REPORTER: &str = "overcommit-operator";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("overcommit_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    let config = Arc::new(OperatorConfig::from_env());
    info!(
        version = %config.app_version,
        namespace = %config.namespace,
        roles = ?config.roles,
        class = ?config.class_name,
        "Starting overcommit-operator"
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let metrics = Arc::new(Metrics::new());
    metrics.set_version(&config.app_version);
    let health_state = Arc::new(HealthState::with_metrics(metrics.clone()));
    let store = Arc::new(KubeStore::new(client.clone(), config.namespace.clone()));

    // Probes must answer before leadership is settled
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Admission is served on every replica, leader or not
    let webhook_handle = if !config.roles.any_webhook() {
        None
    } else if config.cert_path().exists() && config.key_path().exists() {
        info!("TLS certificates found, starting webhook server");
        let events = Arc::new(KubeEventPublisher::new(client.clone(), EVENT_REPORTER));
        let state = Arc::new(WebhookState::new(
            AdmissionEngine::new(store.clone(), events, metrics.clone(), config.class_name.clone()),
            ValidationEngine::new(store.clone()),
        ));
        let config = config.clone();
        Some(tokio::spawn(async move {
            if let Err(e) =
                run_webhook_server(state, &config.roles, &config.cert_path(), &config.key_path()).await
            {
                error!("Webhook server error: {}", e);
            }
        }))
    } else {
        warn!(
            "TLS certificates not found at {} and {}, webhook server disabled",
            config.cert_path().display(),
            config.key_path().display()
        );
        None
    };

    let controllers_handle = if config.roles.any_controller() {
        let ctx = Arc::new(Context::new(store, config.clone(), metrics));
        Some(start_controllers(client, ctx, health_state.clone()).await)
    } else {
        health_state.set_ready(true).await;
        None
    };

    tokio::select! {
        _ = watch(controllers_handle, "Controllers") => {}
        _ = watch(webhook_handle, "Webhook server") => {}
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");
            health_state.set_ready(false).await;
            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;
            info!("Grace period complete, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for an optional task; an absent task never completes
async fn watch(handle: Option<JoinHandle<()>>, name: &str) {
    match handle {
        Some(handle) => {
            if let Err(e) = handle.await {
                error!("{} task panicked: {}", name, e);
            } else {
                error!("{} task exited", name);
            }
        }
        None => std::future::pending::<()>().await,
    }
}

fn lease_lock(client: Client, config: &OperatorConfig) -> LeaseLock {
    LeaseLock::new(
        client,
        &config.namespace,
        LEASE_NAME,
        &config.pod_name,
        Duration::from_secs(LEASE_TTL_SECS),
    )
}

/// Acquire the lease, then run the enabled controllers while renewing it
///
/// Losing the lease exits the process so Kubernetes restarts it into a
/// fresh election.
async fn start_controllers(
    client: Client,
    ctx: Arc<Context>,
    health_state: Arc<HealthState>,
) -> JoinHandle<()> {
    let config = ctx.config.clone();
    let lock = lease_lock(client.clone(), &config);

    info!(
        holder_id = %config.pod_name,
        namespace = %config.namespace,
        lease_name = LEASE_NAME,
        "Waiting to acquire leadership..."
    );
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(true) => {
                info!("Acquired leadership");
                break;
            }
            Ok(false) => info!("Another instance is leader, waiting..."),
            Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
            match lock.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) => {
                    error!("Lost leadership! Shutting down...");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Failed to renew lease: {}. Shutting down...", e);
                    std::process::exit(1);
                }
            }
        }
    });

    health_state.set_ready(true).await;

    let mut tasks: Vec<std::pin::Pin<Box<dyn Future<Output = ()> + Send>>> = Vec::new();
    if config.roles.cluster_controller {
        tasks.push(Box::pin(run_cluster_controller(
            client.clone(),
            ctx.clone(),
            Some(health_state.clone()),
        )));
    }
    if config.roles.class_controller {
        tasks.push(Box::pin(run_class_controller(
            client,
            ctx,
            Some(health_state),
        )));
    }

    tokio::spawn(async move {
        futures::future::join_all(tasks).await;
    })
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
