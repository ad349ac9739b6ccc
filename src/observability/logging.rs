//! # Logging
//!
//! Sets up the global `tracing` subscriber.
//!
//! `RUST_LOG` wins when set; otherwise the filter is built from the configured
//! log level for this crate. Output is JSON or human-readable text.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    /// Parse `json` / `text`; anything else falls back to JSON
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "plain" => LogFormat::Text,
            _ => LogFormat::Json,
        }
    }
}

/// Default filter directive for a log level
#[must_use]
pub fn default_directive(level: &str) -> String {
    format!("extension_sync_controller={}", level.trim().to_ascii_lowercase())
}

/// Install the global subscriber
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(level).into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
