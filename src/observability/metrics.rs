//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `extension_sync_reconciliations_total{outcome}` - Reconciliations by outcome (success, requeue, error)
//! - `extension_sync_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `extension_sync_not_ready_requeues_total` - Requeues caused by a Garden that is not ready
//! - `extension_sync_tenant_connections_established_total` - Tenant connections established
//! - `extension_sync_tenant_connections_cached` - Tenant connections currently cached
//! - `extension_sync_tenant_operations_total{operation}` - Writes against tenant clusters

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "extension_sync_reconciliations_total",
            "Total number of reconciliations by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "extension_sync_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static NOT_READY_REQUEUES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "extension_sync_not_ready_requeues_total",
        "Total number of requeues while the Garden was not ready",
    )
    .expect("Failed to create NOT_READY_REQUEUES_TOTAL metric - this should never happen")
});

static TENANT_CONNECTIONS_ESTABLISHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "extension_sync_tenant_connections_established_total",
        "Total number of tenant connections established",
    )
    .expect(
        "Failed to create TENANT_CONNECTIONS_ESTABLISHED_TOTAL metric - this should never happen",
    )
});

static TENANT_CONNECTIONS_CACHED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "extension_sync_tenant_connections_cached",
        "Current number of cached tenant connections",
    )
    .expect("Failed to create TENANT_CONNECTIONS_CACHED metric - this should never happen")
});

static TENANT_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "extension_sync_tenant_operations_total",
            "Total number of tenant cluster operations by operation type",
        ),
        &["operation"],
    )
    .expect("Failed to create TENANT_OPERATIONS_TOTAL metric - this should never happen")
});

/// Outcome label of a finished reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Requeue,
    Error,
}

impl Outcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Requeue => "requeue",
            Outcome::Error => "error",
        }
    }
}

/// Register all metrics with the process registry.
///
/// Safe to call more than once; metrics that are already registered are skipped.
pub fn register_metrics() -> Result<()> {
    register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    register(Box::new(RECONCILIATION_DURATION.clone()))?;
    register(Box::new(NOT_READY_REQUEUES_TOTAL.clone()))?;
    register(Box::new(TENANT_CONNECTIONS_ESTABLISHED_TOTAL.clone()))?;
    register(Box::new(TENANT_CONNECTIONS_CACHED.clone()))?;
    register(Box::new(TENANT_OPERATIONS_TOTAL.clone()))?;
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn increment_reconciliations(outcome: Outcome) {
    RECONCILIATIONS_TOTAL
        .with_label_values(&[outcome.as_str()])
        .inc();
}

/// Reconciles finished with `outcome` so far
#[must_use]
pub fn reconciliations(outcome: Outcome) -> u64 {
    RECONCILIATIONS_TOTAL
        .with_label_values(&[outcome.as_str()])
        .get()
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_not_ready_requeues() {
    NOT_READY_REQUEUES_TOTAL.inc();
}

pub fn increment_tenant_connections_established() {
    TENANT_CONNECTIONS_ESTABLISHED_TOTAL.inc();
}

pub fn set_tenant_connections_cached(count: usize) {
    TENANT_CONNECTIONS_CACHED.set(i64::try_from(count).unwrap_or(i64::MAX));
}

/// Record a tenant write (`apply` or `delete`)
pub fn increment_tenant_operations(operation: &str) {
    TENANT_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}
