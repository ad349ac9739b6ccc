//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::{ControllerConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::registry::TenantRegistry;
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::kubernetes::{KubeManagementStore, KubeTenantConnector};
use crate::crd::{Extension, Garden};
use crate::observability;
use crate::observability::logging::LogFormat;
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client for the management cluster
    pub client: Client,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub server_config: ServerConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready())
            .field("server_config", &self.server_config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let controller_config = ControllerConfig::from_env();
    let server_config = ServerConfig::from_env();

    let log_format = LogFormat::parse(&controller_config.log_format);
    observability::logging::init_tracing(&controller_config.log_level, log_format)
        .context("Failed to initialize tracing")?;

    info!("Starting Extension Sync Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(config = ?controller_config, "Loaded controller configuration");

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let bound = Arc::new(AtomicBool::new(false));

    let server_state_clone = Arc::clone(&server_state);
    let bound_clone = Arc::clone(&bound);
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone, bound_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&bound, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let store = Arc::new(KubeManagementStore::new(
        client.clone(),
        controller_config.max_conflict_retries,
    ));
    let connector = Arc::new(KubeTenantConnector::new(
        client.clone(),
        controller_config.max_conflict_retries,
    ));
    let registry = Arc::new(TenantRegistry::new(connector));
    let reconciler = Arc::new(Reconciler::new(store, registry, controller_config));

    log_startup_summary(&client, &reconciler.config)
        .instrument(tracing::info_span!("controller.startup.summary"))
        .await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        server_config,
    })
}

/// Wait for the HTTP server to bind its listener
async fn wait_for_server_ready(
    bound: &AtomicBool,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout_duration();
    let poll_interval = server_config.poll_interval_duration();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if bound.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Log the Extensions and Garden present at startup.
///
/// Failures only warn; the watch loop reports and retries on its own.
async fn log_startup_summary(client: &Client, config: &ControllerConfig) {
    let extensions: Api<Extension> = Api::all(client.clone());
    match extensions.list(&ListParams::default()).await {
        Ok(list) => {
            let mut names: Vec<String> = list
                .items
                .iter()
                .filter_map(|ext| ext.metadata.name.clone())
                .collect();
            names.sort();
            info!("Resource Kind: Extension");
            info!("Total Resources: {}", names.len());
            if !names.is_empty() {
                info!(
                    "  Resources ({}): {}",
                    names.len(),
                    if names.len() <= 3 {
                        names.join(", ")
                    } else {
                        format!("{}, ... ({} total)", names[..3].join(", "), names.len())
                    }
                );
            }
        }
        Err(e) => {
            error!("Extension CRD is not queryable; {:?}. Is the CRD installed?", e);
            warn!("Continuing despite CRD queryability check failure - controller will retry");
        }
    }

    let gardens: Api<Garden> = Api::all(client.clone());
    match gardens.get_opt(&config.garden_name).await {
        Ok(Some(garden)) => info!(
            garden = %config.garden_name,
            ready = garden.is_ready(),
            deleting = garden.is_deleting(),
            "Garden found"
        ),
        Ok(None) => info!(
            garden = %config.garden_name,
            "Garden not found, extensions will wait for it"
        ),
        Err(e) => warn!(garden = %config.garden_name, error = %e, "Failed to read Garden"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_server_ready_returns_once_bound() {
        let bound = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(std::future::pending::<()>());
        let config = ServerConfig {
            poll_interval_ms: 5,
            ..ServerConfig::default()
        };

        let flag = Arc::clone(&bound);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            flag.store(true, Ordering::Relaxed);
        });

        wait_for_server_ready(&bound, &handle, &config).await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_wait_for_server_ready_fails_when_task_exits() {
        let bound = AtomicBool::new(false);
        let handle = tokio::spawn(async {});
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }

        let err = wait_for_server_ready(&bound, &handle, &ServerConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));
    }

    #[tokio::test]
    async fn test_wait_for_server_ready_times_out() {
        let bound = AtomicBool::new(false);
        let handle = tokio::spawn(std::future::pending::<()>());
        let config = ServerConfig {
            startup_timeout_secs: 0,
            poll_interval_ms: 1,
            ..ServerConfig::default()
        };

        let err = wait_for_server_ready(&bound, &handle, &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("within 0 seconds"));
        handle.abort();
    }
}
