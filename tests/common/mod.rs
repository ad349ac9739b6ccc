//! Common fixtures for reconciler tests
//!
//! Builds Extensions and Gardens, and wires a `Reconciler` to the in-memory
//! stores with a fixed clock.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use chrono::{TimeZone, Utc};
use extension_sync_controller::config::ControllerConfig;
use extension_sync_controller::controller::reconciler::Reconciler;
use extension_sync_controller::controller::registry::TenantRegistry;
use extension_sync_controller::controller::store::memory::{
    MemoryManagementStore, MemoryTenantConnector, MemoryTenantStore,
};
use extension_sync_controller::controller::store::ManagementStore;
use extension_sync_controller::crd::{
    ControllerResource, Deployment, DeploymentPolicy, Extension, ExtensionDeploymentSpec,
    ExtensionHelm, ExtensionSpec, Garden, GardenSpec, GardenStatus, KubeconfigSecretRef,
    LastOperation, LastOperationState, LastOperationType, OciRepository, VirtualClusterAccess,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::sync::Arc;

pub const GARDEN: &str = "garden";

/// Reconciler plus handles on the stores it talks to
pub struct Harness {
    pub reconciler: Reconciler,
    pub management: Arc<MemoryManagementStore>,
    pub tenant: Arc<MemoryTenantStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    /// Harness whose tenant connection needs a published kubeconfig reference
    pub fn requiring_endpoint() -> Self {
        Self::build(config(), |tenant| {
            MemoryTenantConnector::new(tenant).requiring_endpoint()
        })
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        Self::build(config, MemoryTenantConnector::new)
    }

    fn build(
        config: ControllerConfig,
        connector: impl FnOnce(Arc<MemoryTenantStore>) -> MemoryTenantConnector,
    ) -> Self {
        let management = Arc::new(MemoryManagementStore::new());
        let tenant = Arc::new(MemoryTenantStore::new());
        let registry = Arc::new(TenantRegistry::new(Arc::new(connector(Arc::clone(&tenant)))));
        let store: Arc<dyn ManagementStore> = management.clone();
        let reconciler = Reconciler::new(store, registry, config).with_clock(Arc::new(fixed_now));

        Self {
            reconciler,
            management,
            tenant,
        }
    }
}

/// Controller configuration pointing at [`GARDEN`]
pub fn config() -> ControllerConfig {
    ControllerConfig {
        garden_name: GARDEN.to_string(),
        ..ControllerConfig::default()
    }
}

pub fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn extension(name: &str) -> Extension {
    Extension::new(
        name,
        ExtensionSpec {
            resources: vec![ControllerResource {
                kind: "Worker".to_string(),
                r#type: "local".to_string(),
                primary: Some(true),
                globally_enabled: None,
                reconcile_timeout: None,
                lifecycle: None,
                workerless_supported: None,
            }],
            deployment: Some(Deployment {
                extension: Some(ExtensionDeploymentSpec {
                    helm: Some(ExtensionHelm {
                        oci_repository: Some(OciRepository {
                            r#ref: Some(format!("registry.example.com/charts/{name}:v1.0.0")),
                            ..OciRepository::default()
                        }),
                    }),
                    values: None,
                    policy: Some(DeploymentPolicy::Always),
                }),
            }),
        },
    )
}

pub fn garden(state: LastOperationState) -> Garden {
    let mut garden = Garden::new(GARDEN, GardenSpec::default());
    garden.metadata.uid = Some("garden-uid-1".to_string());
    garden.status = Some(GardenStatus {
        last_operation: Some(LastOperation {
            r#type: LastOperationType::Reconcile,
            state,
            description: None,
            last_update_time: None,
            progress: None,
        }),
        virtual_cluster: Some(VirtualClusterAccess {
            kubeconfig_secret_ref: Some(KubeconfigSecretRef {
                name: "virtual-garden-kubeconfig".to_string(),
                namespace: "garden".to_string(),
                key: None,
            }),
        }),
        observed_generation: Some(1),
    });
    garden
}

/// A ready Garden that has not published its kubeconfig yet
pub fn garden_without_endpoint() -> Garden {
    let mut garden = garden(LastOperationState::Succeeded);
    if let Some(status) = garden.status.as_mut() {
        status.virtual_cluster = None;
    }
    garden
}

/// A Garden marked for deletion
pub fn deleting_garden() -> Garden {
    let mut garden = garden(LastOperationState::Succeeded);
    garden.metadata.deletion_timestamp = Some(deletion_timestamp());
    garden.metadata.finalizers = Some(vec!["gardener".to_string()]);
    garden
}

pub fn deletion_timestamp() -> Time {
    serde_json::from_value(serde_json::json!("2024-05-01T11:00:00Z")).unwrap()
}
