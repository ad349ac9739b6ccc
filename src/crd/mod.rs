//! # Custom Resource Definitions
//!
//! CRD types for the Extension Sync Controller.
//!
//! ## Module Structure
//!
//! - `extension.rs` - Management-side `Extension` resource
//! - `garden.rs` - `Garden` readiness dependency (read-only)
//! - `tenant.rs` - `ControllerRegistration` / `ControllerDeployment` written into tenants
//! - `status.rs` - Status and condition types

mod extension;
mod garden;
mod status;
mod tenant;

pub use extension::{
    ControllerResource, ControllerResourceLifecycle, Deployment, DeploymentPolicy, Extension,
    ExtensionDeploymentSpec, ExtensionHelm, ExtensionSpec, LifecycleStrategy, OciRepository,
};
pub(crate) use extension::preserve_unknown_fields;
pub use garden::{
    Garden, GardenSpec, GardenStatus, KubeconfigSecretRef, LastOperation, LastOperationState,
    LastOperationType, VirtualClusterAccess,
};
pub use status::{Condition, ConditionStatus, ExtensionStatus};
pub use tenant::{
    ControllerDeployment, ControllerDeploymentSpec, ControllerRegistration,
    ControllerRegistrationDeployment, ControllerRegistrationSpec, DeploymentRef,
    HelmControllerDeployment,
};
