//! # Watch Loop
//!
//! Controller watch loop that monitors Extension resources and the configured
//! Garden, and triggers reconciliation when either changes.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{reconcile_key, Reconciler, ReconcilerError};
use crate::controller::server::ServerState;
use crate::crd::{Extension, Garden};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::channel::oneshot;
use futures::{FutureExt, StreamExt};
use kube::api::Api;
use kube::{Client, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, controller::Action, watcher, Controller};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};

/// Run the controller watch loop
///
/// Extensions are watched directly. Any change to the Garden named in the
/// configuration re-enqueues every known Extension, since all of them depend on
/// its readiness. The loop restarts the controller when the watch stream ends
/// and exits once SIGINT or SIGTERM has marked the server not ready.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let config = reconciler.config.clone();
    let backoff_duration_ms = Arc::new(AtomicU64::new(config.backoff_start_ms));

    server_state.set_ready(true);

    // Fires only after readiness has been dropped, so an ended stream is
    // never mistaken for one that needs a restart
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let shutdown = shutdown_rx.map(|_| ()).shared();
    tokio::spawn(drop_readiness_on(
        shutdown_signal(),
        Arc::clone(&server_state),
        shutdown_tx,
    ));

    loop {
        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let watch_span = tracing::info_span!("controller.watch", garden = %config.garden_name);

        info!("Starting controller watch loop...");
        let backoff = Arc::clone(&backoff_duration_ms);
        let filter_config = config.clone();

        let extension_controller = build_controller(&client, &config);
        extension_controller
            .graceful_shutdown_on(shutdown.clone())
            .run(
                reconcile_extension_object,
                handle_reconciliation_error,
                Arc::clone(&reconciler),
            )
            .filter_map(move |x| {
                let backoff = Arc::clone(&backoff);
                let config = filter_config.clone();
                async move {
                    match &x {
                        Ok((obj, action)) => {
                            backoff.store(config.backoff_start_ms, Ordering::Relaxed);
                            debug!(extension = %obj.name, action = ?action, "watch.event.success");
                            Some(x)
                        }
                        Err(e) => {
                            let error_string = format!("{e:?}");
                            handle_watch_stream_error(
                                &error_string,
                                &backoff,
                                config.backoff_max_ms,
                                config.watch_restart_delay_duration(),
                            )
                            .await
                            .map(|()| x)
                        }
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(watch_span)
            .await;

        if !server_state.is_ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = config.watch_restart_delay_after_end_duration();
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Resolves on SIGINT, or on SIGTERM where the platform has it
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Wait for `signal`, mark the server not ready, then trigger controller shutdown
async fn drop_readiness_on<S>(
    signal: S,
    server_state: Arc<ServerState>,
    shutdown_tx: oneshot::Sender<()>,
) where
    S: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Failed to listen for shutdown signal: {}", e);
        // Dropping the sender would stop the controller
        std::future::pending::<()>().await;
        return;
    }
    info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
    server_state.set_ready(false);
    info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    let _ = shutdown_tx.send(());
}

/// Extension controller with the Garden as a secondary watch
fn build_controller(client: &Client, config: &ControllerConfig) -> Controller<Extension> {
    let extensions: Api<Extension> = Api::all(client.clone());
    let gardens: Api<Garden> = Api::all(client.clone());

    let controller = Controller::new(extensions, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciles));

    let store = controller.store();
    controller.watches(
        gardens,
        watcher::Config::default().fields(&format!("metadata.name={}", config.garden_name)),
        move |garden: Garden| {
            debug!(garden = %garden.name_any(), "Garden changed, re-enqueueing all extensions");
            store
                .state()
                .iter()
                .map(|ext| ObjectRef::from_obj(ext.as_ref()))
                .collect::<Vec<_>>()
        },
    )
}

async fn reconcile_extension_object(
    obj: Arc<Extension>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = obj.name_any();
    let result = reconcile_key(&ctx, &name).await;
    match &result {
        Ok(action) => debug!(extension = %name, action = ?action, "watch.event.reconciled"),
        Err(e) => error!(extension = %name, error = %e, "watch.event.reconciliation_failed"),
    }
    result
}
