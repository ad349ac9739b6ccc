//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::BackoffState;
use crate::controller::registry::{RegistryError, TenantRegistry};
use crate::controller::store::{ManagementStore, StoreError};
use crate::controller::synthesizer::SynthesisError;
use chrono::{DateTime, Utc};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Management cluster read or write failed
    #[error("management store: {0}")]
    Store(#[from] StoreError),
    /// Write against the tenant cluster failed
    #[error("tenant store: {0}")]
    Tenant(#[source] StoreError),
    #[error("tenant connection: {0}")]
    Registry(#[from] RegistryError),
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),
    #[error("reconcile exceeded deadline of {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Where a successful reconcile left the Extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// Tenant objects match; checked again after the resync interval
    Synced,
    /// Nothing to keep in sync (absent, or deletion finished)
    Idle,
    /// Waiting for the Garden or its virtual cluster endpoint
    NotReady,
}

impl Settled {
    /// Requeue policy for this outcome
    #[must_use]
    pub fn action(self, config: &ControllerConfig) -> Action {
        match self {
            Settled::Synced => Action::requeue(config.resync_duration()),
            Settled::Idle => Action::await_change(),
            Settled::NotReady => Action::requeue(config.not_ready_requeue_duration()),
        }
    }
}

/// Source of the current time for condition timestamps
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Shared reconciler context
#[derive(Clone)]
pub struct Reconciler {
    pub store: Arc<dyn ManagementStore>,
    pub registry: Arc<TenantRegistry>,
    pub config: ControllerConfig,
    // Backoff state per extension name, advanced by the error policy and reset on success
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    clock: Clock,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn ManagementStore>,
        registry: Arc<TenantRegistry>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock used for condition timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Advance the backoff for `name` and return the delay to wait
    pub fn next_backoff(&self, name: &str) -> (Duration, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = states.entry(name.to_string()).or_insert_with(|| {
            BackoffState::new(
                self.config.backoff_start_duration(),
                self.config.backoff_max_duration(),
            )
        });
        state.increment_error();
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forget the backoff for `name`; returns whether it had recorded errors
    pub fn reset_backoff(&self, name: &str) -> bool {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        states
            .remove(name)
            .is_some_and(|state| state.error_count > 0)
    }
}
