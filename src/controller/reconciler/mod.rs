//! # Reconciler
//!
//! Extension reconciliation.
//!
//! - `types` - Reconciler context and error type
//! - `reconcile` - State machine entry points
//! - `finalize` - Deletion path
//! - `status` - Condition write-back

pub mod finalize;
pub mod reconcile;
pub mod status;
pub mod types;

pub use reconcile::{reconcile, reconcile_key};
pub use types::{Clock, Reconciler, ReconcilerError, Settled};
