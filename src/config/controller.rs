//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_GARDEN_NAME,
    DEFAULT_MAX_CONCURRENT_RECONCILES, DEFAULT_MAX_CONFLICT_RETRIES,
    DEFAULT_NOT_READY_REQUEUE_SECS, DEFAULT_RECONCILE_TIMEOUT_SECS, DEFAULT_RESYNC_SECS,
    DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS, DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Maximum concurrent reconciles; 0 leaves the runtime default (unbounded)
    pub max_concurrent_reconciles: u16,
    /// Fixed requeue interval while the Garden is not ready (seconds)
    pub not_ready_requeue_secs: u64,
    /// Requeue interval after a successful reconcile, so tenant-side drift is repaired (seconds)
    pub resync_secs: u64,
    /// Name of the Garden gating tenant-side work
    pub garden_name: String,
    /// Deadline for one reconcile invocation (seconds)
    pub reconcile_timeout_secs: u64,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Read-modify-write attempts on 409 Conflict
    pub max_conflict_retries: u32,
    /// Watch stream restart delay after unknown errors (seconds)
    pub watch_restart_delay_secs: u64,
    /// Watch stream restart delay after the stream ends (seconds)
    pub watch_restart_delay_after_end_secs: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
            not_ready_requeue_secs: DEFAULT_NOT_READY_REQUEUE_SECS,
            resync_secs: DEFAULT_RESYNC_SECS,
            garden_name: DEFAULT_GARDEN_NAME.to_string(),
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            watch_restart_delay_after_end_secs: DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS,
            log_level: "INFO".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            max_concurrent_reconciles: parsed_or(
                &lookup,
                "MAX_CONCURRENT_RECONCILES",
                defaults.max_concurrent_reconciles,
            ),
            not_ready_requeue_secs: parsed_or(
                &lookup,
                "NOT_READY_REQUEUE_SECS",
                defaults.not_ready_requeue_secs,
            ),
            resync_secs: parsed_or(&lookup, "RESYNC_SECS", defaults.resync_secs),
            garden_name: string_or(&lookup, "GARDEN_NAME", &defaults.garden_name),
            reconcile_timeout_secs: parsed_or(
                &lookup,
                "RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout_secs,
            ),
            backoff_start_ms: parsed_or(&lookup, "BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: parsed_or(&lookup, "BACKOFF_MAX_MS", defaults.backoff_max_ms),
            max_conflict_retries: parsed_or(
                &lookup,
                "MAX_CONFLICT_RETRIES",
                defaults.max_conflict_retries,
            ),
            watch_restart_delay_secs: parsed_or(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            watch_restart_delay_after_end_secs: parsed_or(
                &lookup,
                "WATCH_RESTART_DELAY_AFTER_END_SECS",
                defaults.watch_restart_delay_after_end_secs,
            ),
            log_level: string_or(&lookup, "LOG_LEVEL", &defaults.log_level),
            log_format: string_or(&lookup, "LOG_FORMAT", &defaults.log_format),
        }
    }

    /// Get not-ready requeue duration
    pub fn not_ready_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }

    /// Get resync interval
    pub fn resync_duration(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// Get reconcile deadline
    pub fn reconcile_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }

    /// Get watch restart delay after end duration
    pub fn watch_restart_delay_after_end_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_after_end_secs)
    }
}

/// Read a key and parse it, falling back to `default` when absent or invalid
pub(crate) fn parsed_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a key as a non-empty string or return default
pub(crate) fn string_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
