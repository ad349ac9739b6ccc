//! # Reconciler Tests
//!
//! Drives the Extension state machine against the in-memory stores.

mod common;

use async_trait::async_trait;
use common::{
    deleting_garden, extension, garden, garden_without_endpoint, Harness, GARDEN,
};
use extension_sync_controller::config::ControllerConfig;
use extension_sync_controller::constants::{
    EXTENSION_FINALIZER, LABEL_EXTENSION_NAME, LABEL_MANAGED_BY, MANAGED_BY_VALUE,
};
use extension_sync_controller::controller::conditions::{
    find_condition, CONDITION_RECONCILE_FAILED, CONDITION_RECONCILE_SUCCESS,
    VIRTUAL_CLUSTER_EXTENSION_RECONCILED,
};
use extension_sync_controller::controller::reconciler::{
    reconcile, reconcile_key, Reconciler, ReconcilerError,
};
use extension_sync_controller::controller::registry::TenantRegistry;
use extension_sync_controller::controller::store::memory::{
    MemoryTenantConnector, MemoryTenantStore, Write,
};
use extension_sync_controller::controller::store::{ManagementStore, StoreError, TenantStore};
use extension_sync_controller::crd::{
    ConditionStatus, Extension, ExtensionStatus, Garden, LastOperationState,
};
use extension_sync_controller::observability::metrics::{self, Outcome};
use extension_sync_controller::runtime::error_policy::handle_reconciliation_error;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;

const NAME: &str = "provider-local";

fn not_ready_requeue() -> Action {
    Action::requeue(Duration::from_secs(10))
}

fn resync() -> Action {
    Action::requeue(Duration::from_secs(600))
}

fn with_finalizer(mut ext: Extension) -> Extension {
    ext.metadata.finalizers = Some(vec![EXTENSION_FINALIZER.to_string()]);
    ext
}

/// Reconcile once with a ready Garden so the tenant holds the derived pair
async fn reconciled(harness: &Harness) -> Garden {
    let garden = garden(LastOperationState::Succeeded);
    harness.management.put_extension(extension(NAME));
    let action = reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();
    assert_eq!(action, resync());
    garden
}

#[tokio::test]
async fn test_absent_extension_is_noop() {
    let harness = Harness::new();
    let garden = garden(LastOperationState::Succeeded);

    let action = reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(harness.management.writes().is_empty());
    assert!(harness.tenant.writes().is_empty());
}

#[tokio::test]
async fn test_processing_garden_requeues_without_writes() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));
    let garden = garden(LastOperationState::Processing);

    let action = reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();

    assert_eq!(action, not_ready_requeue());
    assert!(harness.management.writes().is_empty());
    assert!(harness.tenant.writes().is_empty());
    assert!(harness.management.extension(NAME).unwrap().status.is_none());
}

#[tokio::test]
async fn test_ready_garden_applies_pair_and_reports_success() {
    let harness = Harness::new();
    reconciled(&harness).await;

    let registrations = harness.tenant.registrations();
    let deployments = harness.tenant.deployments();
    assert_eq!(registrations.len(), 1);
    assert_eq!(deployments.len(), 1);
    assert_eq!(registrations[0].metadata.name.as_deref(), Some(NAME));
    assert_eq!(deployments[0].metadata.name.as_deref(), Some(NAME));

    let labels = registrations[0].metadata.labels.clone().unwrap();
    assert_eq!(labels.get(LABEL_MANAGED_BY).map(String::as_str), Some(MANAGED_BY_VALUE));
    assert_eq!(labels.get(LABEL_EXTENSION_NAME).map(String::as_str), Some(NAME));

    assert_eq!(
        harness.tenant.writes(),
        vec![
            Write::ApplyRegistration(NAME.to_string()),
            Write::ApplyDeployment(NAME.to_string()),
        ]
    );

    let stored = harness.management.extension(NAME).unwrap();
    assert!(stored.has_finalizer(EXTENSION_FINALIZER));

    let status = stored.status.unwrap();
    assert_eq!(status.observed_generation, Some(1));
    let condition =
        find_condition(&status.conditions, VIRTUAL_CLUSTER_EXTENSION_RECONCILED).unwrap();
    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason.as_deref(), Some(CONDITION_RECONCILE_SUCCESS));
    assert_eq!(
        condition.last_transition_time.as_deref(),
        Some("2024-05-01T12:00:00Z")
    );

    assert_eq!(
        harness.management.writes(),
        vec![
            Write::AddFinalizer(NAME.to_string()),
            Write::Status(NAME.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_repeat_reconcile_skips_unchanged_status() {
    let harness = Harness::new();
    let garden = reconciled(&harness).await;
    let writes_before = harness.management.writes();

    let action = reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();

    assert_eq!(action, resync());
    assert_eq!(harness.management.writes(), writes_before);
    assert_eq!(harness.tenant.registrations().len(), 1);
    assert_eq!(harness.tenant.deployments().len(), 1);
}

#[tokio::test]
async fn test_spec_change_updates_tenant_objects() {
    let harness = Harness::new();
    let garden = reconciled(&harness).await;

    let mut changed = harness.management.extension(NAME).unwrap();
    changed.spec.resources[0].r#type = "remote".to_string();
    changed.metadata.generation = Some(2);
    harness.management.put_extension(changed);

    reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();

    let registration = harness.tenant.registrations().remove(0);
    assert_eq!(registration.spec.resources[0].r#type, "remote");
    let status = harness.management.extension(NAME).unwrap().status.unwrap();
    assert_eq!(status.observed_generation, Some(2));
}

#[tokio::test]
async fn test_deletion_removes_tenant_objects_before_finalizer() {
    let harness = Harness::new();
    let garden = reconciled(&harness).await;

    assert!(harness.management.delete_extension(NAME));
    assert!(harness.management.extension(NAME).unwrap().is_deleting());

    let action = reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(harness.tenant.registrations().is_empty());
    assert!(harness.tenant.deployments().is_empty());
    assert!(harness.management.extension(NAME).is_none());

    let tenant_writes = harness.tenant.writes();
    assert_eq!(
        &tenant_writes[2..],
        &[
            Write::DeleteRegistration(NAME.to_string()),
            Write::DeleteDeployment(NAME.to_string()),
        ]
    );
    assert_eq!(
        harness.management.writes().last(),
        Some(&Write::RemoveFinalizer(NAME.to_string()))
    );
}

#[tokio::test]
async fn test_deleting_extension_without_finalizer_is_left_alone() {
    let harness = Harness::new();
    let mut ext = extension(NAME);
    ext.metadata.deletion_timestamp = Some(common::deletion_timestamp());
    harness.management.put_extension(ext);

    let action = reconcile(
        &harness.reconciler,
        NAME,
        Some(&garden(LastOperationState::Succeeded)),
    )
    .await
    .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(harness.management.writes().is_empty());
    assert!(harness.tenant.writes().is_empty());
}

#[tokio::test]
async fn test_missing_garden_releases_finalizer_and_requeues() {
    let harness = Harness::new();
    harness.management.put_extension(with_finalizer(extension(NAME)));

    let action = reconcile(&harness.reconciler, NAME, None).await.unwrap();

    assert_eq!(action, not_ready_requeue());
    assert!(!harness
        .management
        .extension(NAME)
        .unwrap()
        .has_finalizer(EXTENSION_FINALIZER));
    assert_eq!(
        harness.management.writes(),
        vec![Write::RemoveFinalizer(NAME.to_string())]
    );
    assert!(harness.tenant.writes().is_empty());
}

#[tokio::test]
async fn test_missing_garden_without_finalizer_only_requeues() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));

    let action = reconcile(&harness.reconciler, NAME, None).await.unwrap();

    assert_eq!(action, not_ready_requeue());
    assert!(harness.management.writes().is_empty());
}

#[tokio::test]
async fn test_deleting_garden_skips_tenant_cleanup() {
    let harness = Harness::new();
    reconciled(&harness).await;
    harness.management.delete_extension(NAME);
    let tenant_writes_before = harness.tenant.writes();

    let action = reconcile(&harness.reconciler, NAME, Some(&deleting_garden()))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert!(harness.management.extension(NAME).is_none());
    assert_eq!(harness.tenant.writes(), tenant_writes_before);
}

#[tokio::test]
async fn test_tenant_apply_failure_reports_failed_condition() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));
    harness.tenant.fail_applies(true);

    let err = reconcile(
        &harness.reconciler,
        NAME,
        Some(&garden(LastOperationState::Succeeded)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ReconcilerError::Tenant(_)));

    let status = harness.management.extension(NAME).unwrap().status.unwrap();
    let condition =
        find_condition(&status.conditions, VIRTUAL_CLUSTER_EXTENSION_RECONCILED).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason.as_deref(), Some(CONDITION_RECONCILE_FAILED));
    assert!(condition
        .message
        .as_deref()
        .unwrap()
        .contains("tenant API unavailable"));
}

#[tokio::test]
async fn test_recovery_flips_condition_back_to_true() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));
    let garden = garden(LastOperationState::Succeeded);

    harness.tenant.fail_applies(true);
    reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap_err();

    harness.tenant.fail_applies(false);
    let action = reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();

    assert_eq!(action, resync());
    let status = harness.management.extension(NAME).unwrap().status.unwrap();
    assert_eq!(status.conditions.len(), 1);
    assert_eq!(status.conditions[0].status, ConditionStatus::True);
}

#[tokio::test]
async fn test_status_write_failure_is_an_error() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));
    harness.management.fail_status_updates(true);

    let err = reconcile(
        &harness.reconciler,
        NAME,
        Some(&garden(LastOperationState::Succeeded)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ReconcilerError::Store(_)));
    assert_eq!(harness.tenant.registrations().len(), 1);
}

#[tokio::test]
async fn test_unpublished_endpoint_requeues_without_status() {
    let harness = Harness::requiring_endpoint();
    harness.management.put_extension(extension(NAME));

    let action = reconcile(&harness.reconciler, NAME, Some(&garden_without_endpoint()))
        .await
        .unwrap();

    assert_eq!(action, not_ready_requeue());
    assert!(harness.tenant.writes().is_empty());
    assert!(harness.management.extension(NAME).unwrap().status.is_none());
    assert!(!harness
        .management
        .writes()
        .contains(&Write::Status(NAME.to_string())));
}

#[tokio::test]
async fn test_unpublished_endpoint_keeps_finalizer_on_delete() {
    let harness = Harness::requiring_endpoint();
    harness.management.put_extension(with_finalizer(extension(NAME)));
    harness.management.delete_extension(NAME);

    let action = reconcile(&harness.reconciler, NAME, Some(&garden_without_endpoint()))
        .await
        .unwrap();

    assert_eq!(action, not_ready_requeue());
    let stored = harness.management.extension(NAME).unwrap();
    assert!(stored.is_deleting());
    assert!(stored.has_finalizer(EXTENSION_FINALIZER));
}

#[tokio::test]
async fn test_reconcile_key_reads_configured_garden() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));

    let action = reconcile_key(&harness.reconciler, NAME).await.unwrap();
    assert_eq!(action, not_ready_requeue());

    harness
        .management
        .put_garden(garden(LastOperationState::Succeeded));
    let action = reconcile_key(&harness.reconciler, NAME).await.unwrap();
    assert_eq!(action, resync());
    assert_eq!(harness.tenant.registrations().len(), 1);

    harness.management.remove_garden(GARDEN);
    let action = reconcile_key(&harness.reconciler, NAME).await.unwrap();
    assert_eq!(action, not_ready_requeue());
    assert!(harness.reconciler.registry.is_empty());
}

#[tokio::test]
async fn test_error_policy_backs_off_and_resets_on_success() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));
    let ctx = Arc::new(harness.reconciler.clone());
    let obj = Arc::new(extension(NAME));
    let err = ReconcilerError::Timeout(Duration::from_secs(60));

    let first = handle_reconciliation_error(Arc::clone(&obj), &err, Arc::clone(&ctx));
    let second = handle_reconciliation_error(Arc::clone(&obj), &err, Arc::clone(&ctx));
    assert_eq!(first, Action::requeue(Duration::from_secs(1)));
    assert_eq!(second, Action::requeue(Duration::from_secs(2)));

    reconcile(&ctx, NAME, Some(&garden(LastOperationState::Succeeded)))
        .await
        .unwrap();

    let after_success = handle_reconciliation_error(obj, &err, ctx);
    assert_eq!(after_success, Action::requeue(Duration::from_secs(1)));
}

/// Management store whose Garden lookup never completes in time
struct SlowStore;

#[async_trait]
impl ManagementStore for SlowStore {
    async fn get_extension(&self, _name: &str) -> Result<Option<Extension>, StoreError> {
        Ok(None)
    }

    async fn get_garden(&self, _name: &str) -> Result<Option<Garden>, StoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn add_finalizer(&self, name: &str, _finalizer: &str) -> Result<Extension, StoreError> {
        Err(StoreError::NotFound {
            kind: "Extension",
            name: name.to_string(),
        })
    }

    async fn remove_finalizer(&self, _name: &str, _finalizer: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn update_status(&self, _name: &str, _status: &ExtensionStatus) -> Result<(), StoreError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_key_times_out() {
    let registry = Arc::new(TenantRegistry::new(Arc::new(MemoryTenantConnector::new(
        Arc::new(MemoryTenantStore::new()),
    ))));
    let config = ControllerConfig {
        reconcile_timeout_secs: 1,
        ..ControllerConfig::default()
    };
    let reconciler = Reconciler::new(Arc::new(SlowStore), registry, config);

    let err = reconcile_key(&reconciler, NAME).await.unwrap_err();

    assert!(matches!(err, ReconcilerError::Timeout(d) if d == Duration::from_secs(1)));
    assert_eq!(err.to_string(), "reconcile exceeded deadline of 1s");
}

#[tokio::test]
async fn test_resync_repairs_deleted_tenant_objects() {
    let harness = Harness::with_config(ControllerConfig {
        resync_secs: 45,
        ..common::config()
    });
    let garden = garden(LastOperationState::Succeeded);
    harness.management.put_extension(extension(NAME));

    let action = reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(45)));

    // Someone removes the pair from the virtual cluster behind our back
    harness.tenant.delete_registration(NAME).await.unwrap();
    harness.tenant.delete_deployment(NAME).await.unwrap();
    assert!(harness.tenant.registrations().is_empty());

    reconcile(&harness.reconciler, NAME, Some(&garden))
        .await
        .unwrap();

    assert_eq!(harness.tenant.registrations().len(), 1);
    assert_eq!(harness.tenant.deployments().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_apply_is_recorded_on_condition() {
    let harness = Harness::with_config(ControllerConfig {
        reconcile_timeout_secs: 1,
        ..common::config()
    });
    harness.management.put_extension(extension(NAME));
    harness
        .management
        .put_garden(garden(LastOperationState::Succeeded));
    harness.tenant.stall_applies(true);

    let err = reconcile_key(&harness.reconciler, NAME).await.unwrap_err();

    assert!(matches!(err, ReconcilerError::Timeout(_)));
    let status = harness.management.extension(NAME).unwrap().status.unwrap();
    let condition =
        find_condition(&status.conditions, VIRTUAL_CLUSTER_EXTENSION_RECONCILED).unwrap();
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason.as_deref(), Some(CONDITION_RECONCILE_FAILED));
    assert_eq!(
        condition.message.as_deref(),
        Some("reconcile exceeded deadline of 1s")
    );
}

#[tokio::test]
async fn test_garden_read_failure_counts_as_failed_reconcile() {
    let harness = Harness::new();
    harness.management.put_extension(extension(NAME));
    harness.management.fail_garden_reads(true);
    let errors_before = metrics::reconciliations(Outcome::Error);

    let err = reconcile_key(&harness.reconciler, NAME).await.unwrap_err();

    assert!(matches!(err, ReconcilerError::Store(_)));
    assert!(metrics::reconciliations(Outcome::Error) > errors_before);
    assert!(harness.management.writes().is_empty());
}
