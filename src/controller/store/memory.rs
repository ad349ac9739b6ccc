//! # In-memory Stores
//!
//! Process-local implementations of `ManagementStore` and `TenantStore`.
//!
//! They follow API-server semantics closely enough for the reconciler:
//! deleting an object that still carries finalizers only sets its deletion
//! timestamp, and removing the last finalizer from such an object deletes it.
//! Resource versions are bumped on every write.

use super::{ManagementStore, StoreError, TenantStore};
use crate::controller::registry::{RegistryError, TenantConnector};
use crate::crd::{ControllerDeployment, ControllerRegistration, Extension, ExtensionStatus, Garden};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kinds of writes recorded by the in-memory stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    AddFinalizer(String),
    RemoveFinalizer(String),
    Status(String),
    ApplyRegistration(String),
    ApplyDeployment(String),
    DeleteRegistration(String),
    DeleteDeployment(String),
}

#[derive(Debug, Default)]
struct ManagementState {
    extensions: BTreeMap<String, Extension>,
    gardens: BTreeMap<String, Garden>,
    writes: Vec<Write>,
}

/// In-memory management cluster
#[derive(Debug, Default)]
pub struct MemoryManagementStore {
    state: Mutex<ManagementState>,
    version: AtomicU64,
    fail_status_updates: AtomicBool,
    fail_garden_reads: AtomicBool,
}

impl MemoryManagementStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an extension as an external actor would
    pub fn put_extension(&self, mut extension: Extension) {
        let name = extension.metadata.name.clone().unwrap_or_default();
        extension.metadata.resource_version = Some(self.next_version());
        if extension.metadata.generation.is_none() {
            extension.metadata.generation = Some(1);
        }
        self.lock().extensions.insert(name, extension);
    }

    /// Delete an extension as an external actor would: objects with finalizers
    /// are only marked for deletion.
    pub fn delete_extension(&self, name: &str) -> bool {
        let mut state = self.lock();
        let Some(extension) = state.extensions.get_mut(name) else {
            return false;
        };
        let has_finalizers = extension
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            if extension.metadata.deletion_timestamp.is_none() {
                extension.metadata.deletion_timestamp = deletion_time();
            }
        } else {
            state.extensions.remove(name);
        }
        true
    }

    pub fn put_garden(&self, garden: Garden) {
        let name = garden.metadata.name.clone().unwrap_or_default();
        self.lock().gardens.insert(name, garden);
    }

    pub fn remove_garden(&self, name: &str) {
        self.lock().gardens.remove(name);
    }

    /// Snapshot of an extension
    #[must_use]
    pub fn extension(&self, name: &str) -> Option<Extension> {
        self.lock().extensions.get(name).cloned()
    }

    /// Writes performed through the `ManagementStore` interface, in order
    #[must_use]
    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    /// Make subsequent status writes fail
    pub fn fail_status_updates(&self, fail: bool) {
        self.fail_status_updates.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent Garden reads fail
    pub fn fail_garden_reads(&self, fail: bool) {
        self.fail_garden_reads.store(fail, Ordering::SeqCst);
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn lock(&self) -> MutexGuard<'_, ManagementState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ManagementStore for MemoryManagementStore {
    async fn get_extension(&self, name: &str) -> Result<Option<Extension>, StoreError> {
        Ok(self.extension(name))
    }

    async fn get_garden(&self, name: &str) -> Result<Option<Garden>, StoreError> {
        if self.fail_garden_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Other("management API unavailable".to_string()));
        }
        Ok(self.lock().gardens.get(name).cloned())
    }

    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<Extension, StoreError> {
        let version = self.next_version();
        let mut state = self.lock();
        let extension = state
            .extensions
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Extension",
                name: name.to_string(),
            })?;
        if !extension.has_finalizer(finalizer) {
            extension
                .metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(finalizer.to_string());
            extension.metadata.resource_version = Some(version);
        }
        let updated = extension.clone();
        state.writes.push(Write::AddFinalizer(name.to_string()));
        Ok(updated)
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), StoreError> {
        let version = self.next_version();
        let mut state = self.lock();
        let Some(extension) = state.extensions.get_mut(name) else {
            return Ok(());
        };
        if let Some(finalizers) = extension.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        extension.metadata.resource_version = Some(version);
        let released = extension.metadata.deletion_timestamp.is_some()
            && extension
                .metadata
                .finalizers
                .as_ref()
                .is_none_or(Vec::is_empty);
        if released {
            state.extensions.remove(name);
        }
        state.writes.push(Write::RemoveFinalizer(name.to_string()));
        Ok(())
    }

    async fn update_status(&self, name: &str, status: &ExtensionStatus) -> Result<(), StoreError> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Other("status update rejected".to_string()));
        }
        let mut state = self.lock();
        let extension = state
            .extensions
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound {
                kind: "Extension",
                name: name.to_string(),
            })?;
        extension.status = Some(status.clone());
        state.writes.push(Write::Status(name.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TenantState {
    registrations: BTreeMap<String, ControllerRegistration>,
    deployments: BTreeMap<String, ControllerDeployment>,
    writes: Vec<Write>,
}

/// In-memory tenant cluster
#[derive(Debug, Default)]
pub struct MemoryTenantStore {
    state: Mutex<TenantState>,
    fail_applies: AtomicBool,
    stall_applies: AtomicBool,
}

impl MemoryTenantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn registrations(&self) -> Vec<ControllerRegistration> {
        self.lock().registrations.values().cloned().collect()
    }

    #[must_use]
    pub fn deployments(&self) -> Vec<ControllerDeployment> {
        self.lock().deployments.values().cloned().collect()
    }

    #[must_use]
    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    /// Make subsequent applies fail
    pub fn fail_applies(&self, fail: bool) {
        self.fail_applies.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent applies hang until the caller gives up on them
    pub fn stall_applies(&self, stall: bool) {
        self.stall_applies.store(stall, Ordering::SeqCst);
    }

    async fn check_apply(&self) -> Result<(), StoreError> {
        if self.stall_applies.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(StoreError::Other("tenant API unavailable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, TenantState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn object_name(name: Option<&String>) -> Result<String, StoreError> {
    name.cloned()
        .ok_or_else(|| StoreError::Other("object has no name".to_string()))
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn apply_registration(
        &self,
        registration: &ControllerRegistration,
    ) -> Result<(), StoreError> {
        self.check_apply().await?;
        let name = object_name(registration.metadata.name.as_ref())?;
        let mut state = self.lock();
        state.registrations.insert(name.clone(), registration.clone());
        state.writes.push(Write::ApplyRegistration(name));
        Ok(())
    }

    async fn delete_registration(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.registrations.remove(name);
        state.writes.push(Write::DeleteRegistration(name.to_string()));
        Ok(())
    }

    async fn apply_deployment(&self, deployment: &ControllerDeployment) -> Result<(), StoreError> {
        self.check_apply().await?;
        let name = object_name(deployment.metadata.name.as_ref())?;
        let mut state = self.lock();
        state.deployments.insert(name.clone(), deployment.clone());
        state.writes.push(Write::ApplyDeployment(name));
        Ok(())
    }

    async fn delete_deployment(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.deployments.remove(name);
        state.writes.push(Write::DeleteDeployment(name.to_string()));
        Ok(())
    }
}

/// Connector that hands out one shared in-memory tenant store for every Garden
/// that publishes connection parameters.
#[derive(Debug, Clone)]
pub struct MemoryTenantConnector {
    store: Arc<MemoryTenantStore>,
    require_endpoint: bool,
}

impl MemoryTenantConnector {
    #[must_use]
    pub fn new(store: Arc<MemoryTenantStore>) -> Self {
        Self {
            store,
            require_endpoint: false,
        }
    }

    /// Refuse to connect until the Garden publishes a kubeconfig reference
    #[must_use]
    pub fn requiring_endpoint(mut self) -> Self {
        self.require_endpoint = true;
        self
    }
}

#[async_trait]
impl TenantConnector for MemoryTenantConnector {
    async fn connect(&self, garden: &Garden) -> Result<Arc<dyn TenantStore>, RegistryError> {
        if self.require_endpoint && garden.kubeconfig_secret_ref().is_none() {
            return Err(RegistryError::EndpointUnavailable(
                "garden does not publish a kubeconfig secret".to_string(),
            ));
        }
        Ok(Arc::clone(&self.store) as Arc<dyn TenantStore>)
    }
}

/// Current time as an API timestamp
fn deletion_time() -> Option<Time> {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(now)).ok()
}

