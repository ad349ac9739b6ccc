//! # Controller
//!
//! Core controller modules for the Extension Sync Controller.
//!
//! - `backoff`: Exponential backoff for failed reconciles
//! - `conditions`: Status condition merging
//! - `reconciler`: Extension state machine
//! - `registry`: Tenant connection cache
//! - `server`: HTTP server for metrics and health checks
//! - `store`: Management and tenant store interfaces
//! - `synthesizer`: Extension to tenant object mapping

pub mod backoff;
pub mod conditions;
pub mod reconciler;
pub mod registry;
pub mod server;
pub mod store;
pub mod synthesizer;
