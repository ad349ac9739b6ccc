//! Extension Sync Controller Library
//!
//! Keeps the `ControllerRegistration` and `ControllerDeployment` objects of a
//! tenant (virtual) cluster in line with the `Extension` resources of the
//! management cluster, gated on the readiness of the `Garden`.
//!
//! ## Quick Start
//!
//! ```rust
//! use extension_sync_controller::prelude::*;
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
