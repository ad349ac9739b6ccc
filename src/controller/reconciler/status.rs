//! # Status
//!
//! Writes the `VirtualClusterExtensionReconciled` condition back to the Extension.
//! Writes are skipped when neither the condition set nor the observed generation
//! would change, to avoid needless watch events.

use crate::controller::conditions::{
    merge_condition, CONDITION_RECONCILE_FAILED, CONDITION_RECONCILE_SUCCESS,
    VIRTUAL_CLUSTER_EXTENSION_RECONCILED,
};
use crate::controller::reconciler::types::Reconciler;
use crate::controller::store::StoreError;
use crate::crd::{ConditionStatus, Extension, ExtensionStatus};
use tracing::debug;

/// Result of a status write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    Written,
    Unchanged,
    /// The extension disappeared before the write
    Gone,
}

/// Compute the status that results from setting the reconciled condition
#[must_use]
pub fn desired_status(
    extension: &Extension,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> ExtensionStatus {
    let current = extension.status.clone().unwrap_or_default();
    ExtensionStatus {
        conditions: merge_condition(
            &current.conditions,
            VIRTUAL_CLUSTER_EXTENSION_RECONCILED,
            status,
            reason,
            message,
            now,
        ),
        observed_generation: extension.metadata.generation.or(current.observed_generation),
    }
}

async fn write(
    ctx: &Reconciler,
    extension: &Extension,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Result<StatusWrite, StoreError> {
    let name = extension.metadata.name.as_deref().unwrap_or_default();
    let desired = desired_status(extension, status, reason, message, ctx.now());

    if extension.status.as_ref() == Some(&desired) {
        debug!(extension = name, "Status unchanged, skipping update");
        return Ok(StatusWrite::Unchanged);
    }

    match ctx.store.update_status(name, &desired).await {
        Ok(()) => Ok(StatusWrite::Written),
        Err(StoreError::NotFound { .. }) => Ok(StatusWrite::Gone),
        Err(e) => Err(e),
    }
}

/// Record a successful apply
pub async fn mark_reconciled(
    ctx: &Reconciler,
    extension: &Extension,
) -> Result<StatusWrite, StoreError> {
    write(
        ctx,
        extension,
        ConditionStatus::True,
        CONDITION_RECONCILE_SUCCESS,
        "Successfully reconciled extension in virtual cluster",
    )
    .await
}

/// Record a failed apply carrying the error text
pub async fn mark_failed(
    ctx: &Reconciler,
    extension: &Extension,
    error: &str,
) -> Result<StatusWrite, StoreError> {
    write(
        ctx,
        extension,
        ConditionStatus::False,
        CONDITION_RECONCILE_FAILED,
        error,
    )
    .await
}
