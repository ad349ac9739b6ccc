//! # Stores
//!
//! Interfaces to the two object stores the reconciler talks to.
//!
//! - `ManagementStore` - the management cluster holding `Extension` and `Garden`
//! - `TenantStore` - one virtual cluster holding the derived objects
//!
//! `kubernetes` implements both against the Kubernetes API; `memory` provides
//! in-process implementations used by tests and local runs.

pub mod kubernetes;
pub mod memory;

use crate::crd::{ControllerDeployment, ControllerRegistration, Extension, ExtensionStatus, Garden};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("conflict updating {kind} {name}: retries exhausted")]
    ConflictRetriesExhausted { kind: &'static str, name: String },
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

/// Access to the management cluster
#[async_trait]
pub trait ManagementStore: Send + Sync {
    /// Read an extension; `Ok(None)` when it does not exist
    async fn get_extension(&self, name: &str) -> Result<Option<Extension>, StoreError>;

    /// Read the readiness dependency; `Ok(None)` when it does not exist
    async fn get_garden(&self, name: &str) -> Result<Option<Garden>, StoreError>;

    /// Add `finalizer` to the extension if absent (read-modify-write).
    /// Returns the stored object after the change.
    async fn add_finalizer(&self, name: &str, finalizer: &str) -> Result<Extension, StoreError>;

    /// Remove `finalizer` from the extension if present (read-modify-write).
    /// A missing extension is not an error.
    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), StoreError>;

    /// Write the status subresource only
    async fn update_status(&self, name: &str, status: &ExtensionStatus) -> Result<(), StoreError>;
}

/// Access to one tenant (virtual) cluster.
///
/// Apply is create-if-absent, otherwise update in place. Delete of a missing
/// object succeeds.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn apply_registration(&self, registration: &ControllerRegistration)
        -> Result<(), StoreError>;

    async fn delete_registration(&self, name: &str) -> Result<(), StoreError>;

    async fn apply_deployment(&self, deployment: &ControllerDeployment) -> Result<(), StoreError>;

    async fn delete_deployment(&self, name: &str) -> Result<(), StoreError>;
}
