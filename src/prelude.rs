//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use extension_sync_controller::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::controller::reconciler::{
    reconcile, reconcile_key, Reconciler, ReconcilerError,
};
pub use crate::controller::registry::{RegistryError, TenantConnector, TenantRegistry};
pub use crate::controller::store::{ManagementStore, StoreError, TenantStore};
pub use crate::controller::synthesizer::{synthesize, SynthesisError};

pub use crate::config::{ControllerConfig, ServerConfig};
