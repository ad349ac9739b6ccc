//! # Reconcile
//!
//! State machine for one Extension per invocation:
//!
//! - **Absent**: nothing to do
//! - **Deleting**: tenant cleanup, then finalizer removal (see `finalize`)
//! - **Garden not ready**: fixed requeue, no writes
//! - **Reconciling**: finalizer, tenant connection, synthesize, apply, status,
//!   then a resync requeue so tenant-side drift is repaired
//!
//! The Garden is resolved by the caller and passed in explicitly.

use crate::constants::EXTENSION_FINALIZER;
use crate::controller::reconciler::finalize::finalize;
use crate::controller::reconciler::status::{mark_failed, mark_reconciled, StatusWrite};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError, Settled};
use crate::controller::registry::RegistryError;
use crate::controller::store::StoreError;
use crate::controller::synthesizer::synthesize;
use crate::crd::{Extension, Garden};
use crate::observability;
use crate::observability::metrics::Outcome;
use kube_runtime::controller::Action;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// What the apply branch concluded
enum Applied {
    Done,
    /// The tenant endpoint is not published yet
    NotReady(RegistryError),
}

/// Reconcile the Extension `name` against `garden`, recording metrics
pub async fn reconcile(
    ctx: &Reconciler,
    name: &str,
    garden: Option<&Garden>,
) -> Result<Action, ReconcilerError> {
    let garden_name = garden
        .and_then(|g| g.metadata.name.as_deref())
        .unwrap_or("<none>");
    observed(ctx, name, garden_name, reconcile_extension(ctx, name, garden)).await
}

/// Resolve the Garden from the store, then reconcile within the configured deadline
pub async fn reconcile_key(ctx: &Reconciler, name: &str) -> Result<Action, ReconcilerError> {
    let deadline = ctx.config.reconcile_timeout_duration();
    let work = async {
        let garden = ctx.store.get_garden(&ctx.config.garden_name).await?;
        reconcile_extension(ctx, name, garden.as_ref()).await
    };
    let bounded = async {
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(record_timeout(ctx, name, deadline).await),
        }
    };
    observed(ctx, name, &ctx.config.garden_name, bounded).await
}

/// Run `work` in a reconcile span and record its duration and outcome
async fn observed<F>(
    ctx: &Reconciler,
    name: &str,
    garden: &str,
    work: F,
) -> Result<Action, ReconcilerError>
where
    F: Future<Output = Result<Settled, ReconcilerError>>,
{
    let start = Instant::now();
    let span = tracing::info_span!("reconcile", extension = name, garden);
    let result = work.instrument(span).await;

    observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    match result {
        Ok(Settled::NotReady) => {
            observability::metrics::increment_reconciliations(Outcome::Requeue);
            Ok(Settled::NotReady.action(&ctx.config))
        }
        Ok(settled) => {
            observability::metrics::increment_reconciliations(Outcome::Success);
            if ctx.reset_backoff(name) {
                info!(extension = name, "Backoff reset after successful reconcile");
            }
            Ok(settled.action(&ctx.config))
        }
        Err(e) => {
            observability::metrics::increment_reconciliations(Outcome::Error);
            Err(e)
        }
    }
}

/// The in-flight work has been dropped at its deadline. Surface that on the
/// condition the same way a failed apply is surfaced.
async fn record_timeout(ctx: &Reconciler, name: &str, deadline: Duration) -> ReconcilerError {
    let err = ReconcilerError::Timeout(deadline);
    error!(error = %err, "Reconcile timed out");

    let record = async {
        if let Some(extension) = ctx.store.get_extension(name).await? {
            mark_failed(ctx, &extension, &err.to_string()).await?;
        }
        Ok::<_, StoreError>(())
    };
    match tokio::time::timeout(deadline, record).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to record timeout condition"),
        Err(_) => warn!("Recording the timeout condition also exceeded the deadline"),
    }
    err
}

async fn reconcile_extension(
    ctx: &Reconciler,
    name: &str,
    garden: Option<&Garden>,
) -> Result<Settled, ReconcilerError> {
    let Some(extension) = ctx.store.get_extension(name).await? else {
        debug!("Extension not found, nothing to do");
        return Ok(Settled::Idle);
    };

    // A Garden being deleted takes its virtual cluster with it
    let garden = garden.filter(|g| !g.is_deleting());

    if extension.is_deleting() {
        return finalize(ctx, &extension, garden).await;
    }

    let Some(garden) = garden else {
        return garden_absent(ctx, &extension).await;
    };

    if !garden.is_ready() {
        debug!("Garden is not ready yet, requeueing");
        return Ok(not_ready());
    }

    match apply(ctx, &extension, garden).await {
        Ok(Applied::Done) => {
            if mark_reconciled(ctx, &extension).await? == StatusWrite::Written {
                info!("Extension reconciled into virtual cluster");
            }
            Ok(Settled::Synced)
        }
        Ok(Applied::NotReady(e)) => {
            debug!(error = %e, "Virtual cluster endpoint unavailable, requeueing");
            Ok(not_ready())
        }
        Err(e) => {
            error!(error = %e, "Failed to reconcile extension into virtual cluster");
            if let Err(status_err) = mark_failed(ctx, &extension, &e.to_string()).await {
                warn!(error = %status_err, "Failed to record failure condition");
            }
            Err(e)
        }
    }
}

/// Finalizer, tenant connection, synthesis and apply
async fn apply(
    ctx: &Reconciler,
    extension: &Extension,
    garden: &Garden,
) -> Result<Applied, ReconcilerError> {
    let name = extension.metadata.name.as_deref().unwrap_or_default();

    if !extension.has_finalizer(EXTENSION_FINALIZER) {
        ctx.store.add_finalizer(name, EXTENSION_FINALIZER).await?;
        debug!("Added finalizer");
    }

    let tenant = match ctx.registry.resolve(garden).await {
        Ok(tenant) => tenant,
        Err(e) if e.is_not_ready() => return Ok(Applied::NotReady(e)),
        Err(e) => return Err(e.into()),
    };

    let derived = synthesize(extension)?;
    tenant
        .apply_registration(&derived.registration)
        .await
        .map_err(ReconcilerError::Tenant)?;
    tenant
        .apply_deployment(&derived.deployment)
        .await
        .map_err(ReconcilerError::Tenant)?;

    Ok(Applied::Done)
}

/// The Garden does not exist. No tenant objects can exist either, so the
/// finalizer is released and the extension waits for a Garden to appear.
async fn garden_absent(
    ctx: &Reconciler,
    extension: &Extension,
) -> Result<Settled, ReconcilerError> {
    let name = extension.metadata.name.as_deref().unwrap_or_default();
    if ctx.registry.invalidate_garden(&ctx.config.garden_name) > 0 {
        debug!("Dropped tenant connections of missing Garden");
    }
    if extension.has_finalizer(EXTENSION_FINALIZER) {
        ctx.store.remove_finalizer(name, EXTENSION_FINALIZER).await?;
        info!("Garden is gone, released finalizer");
    }
    debug!("Garden not found, requeueing");
    Ok(not_ready())
}

fn not_ready() -> Settled {
    observability::metrics::increment_not_ready_requeues();
    Settled::NotReady
}
