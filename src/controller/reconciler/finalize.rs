//! # Finalization
//!
//! Deletion path of an Extension. Tenant-side objects are removed first; the
//! finalizer is released only after every tenant delete succeeded or the tenant
//! is known to be gone together with its Garden.

use crate::constants::EXTENSION_FINALIZER;
use crate::controller::reconciler::types::{Reconciler, ReconcilerError, Settled};
use crate::controller::store::TenantStore;
use crate::controller::synthesizer::derived_name;
use crate::crd::{Extension, Garden};
use crate::observability;
use tracing::{debug, info, warn};

/// Delete the derived pair from the tenant
pub async fn delete_tenant_objects(
    tenant: &dyn TenantStore,
    extension_name: &str,
) -> Result<(), ReconcilerError> {
    let name = derived_name(extension_name);
    tenant
        .delete_registration(&name)
        .await
        .map_err(ReconcilerError::Tenant)?;
    tenant
        .delete_deployment(&name)
        .await
        .map_err(ReconcilerError::Tenant)?;
    Ok(())
}

/// Clean up a deleting Extension.
///
/// `garden` is `None` when the Garden is absent or itself being deleted; the
/// tenant cluster goes away with it, so there is nothing left to delete.
pub async fn finalize(
    ctx: &Reconciler,
    extension: &Extension,
    garden: Option<&Garden>,
) -> Result<Settled, ReconcilerError> {
    let name = extension.metadata.name.as_deref().unwrap_or_default();

    if !extension.has_finalizer(EXTENSION_FINALIZER) {
        debug!(extension = name, "Deleting extension carries no finalizer, nothing to clean up");
        return Ok(Settled::Idle);
    }

    match garden {
        Some(garden) => match ctx.registry.resolve(garden).await {
            Ok(tenant) => {
                delete_tenant_objects(tenant.as_ref(), name).await?;
                info!(extension = name, "Deleted derived objects from virtual cluster");
            }
            Err(e) if e.is_not_ready() => {
                warn!(
                    extension = name,
                    error = %e,
                    "Virtual cluster unreachable, keeping finalizer until it can be cleaned up"
                );
                observability::metrics::increment_not_ready_requeues();
                return Ok(Settled::NotReady);
            }
            Err(e) => return Err(e.into()),
        },
        None => {
            info!(
                extension = name,
                "Garden is gone, skipping virtual cluster cleanup"
            );
        }
    }

    ctx.store.remove_finalizer(name, EXTENSION_FINALIZER).await?;
    info!(extension = name, "Removed finalizer");
    Ok(Settled::Idle)
}
