//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Finalizer guarding tenant-side cleanup of an Extension
pub const EXTENSION_FINALIZER: &str = "operator.extensions.dev/extension-virtual-cluster";

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "extension-sync-controller";

/// Label marking tenant objects owned by this controller
pub const LABEL_MANAGED_BY: &str = "extensions.dev/managed-by";

/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY_VALUE: &str = "extension-sync-controller";

/// Label carrying the name of the Extension a tenant object was derived from
pub const LABEL_EXTENSION_NAME: &str = "extensions.dev/extension";

/// Well-known name of the Garden gating tenant-side work
pub const DEFAULT_GARDEN_NAME: &str = "garden";

/// Secret key holding the virtual cluster kubeconfig when the reference omits one
pub const DEFAULT_KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval while the Garden is not ready (seconds)
pub const DEFAULT_NOT_READY_REQUEUE_SECS: u64 = 10;

/// Default interval for re-checking a reconciled Extension (seconds)
pub const DEFAULT_RESYNC_SECS: u64 = 600;

/// Default deadline for a single reconcile invocation (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;

/// Default maximum concurrent reconciles (0 = runtime default)
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 0;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Default number of read-modify-write attempts on 409 Conflict
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 5;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;
