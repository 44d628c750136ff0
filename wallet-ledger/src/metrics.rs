//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_operations_total{kind,outcome}` - Operations by kind and result
//! - `ledger_entries_total` - Total number of entries posted
//! - `ledger_operation_duration_seconds{kind}` - Histogram of operation latencies
//! - `ledger_lock_wait_seconds` - Histogram of row lock wait times
//!
//! Collectors are registered only in the registry owned by [`Metrics`],
//! so several ledgers (or tests) can each hold their own.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Operations by kind and outcome
    pub operations_total: IntCounterVec,

    /// Total entries posted
    pub entries_total: IntCounter,

    /// Operation duration histogram
    pub operation_duration: HistogramVec,

    /// Row lock wait histogram
    pub lock_wait: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("entries_total", &self.entries_total.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Ledger operations by kind and outcome"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let entries_total =
            IntCounter::new("ledger_entries_total", "Total number of entries posted")?;
        registry.register(Box::new(entries_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of operation latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
            &["kind"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let lock_wait = Histogram::with_opts(
            HistogramOpts::new("ledger_lock_wait_seconds", "Histogram of row lock wait times")
                .buckets(vec![0.0001, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(lock_wait.clone()))?;

        Ok(Self {
            operations_total,
            entries_total,
            operation_duration,
            lock_wait,
            registry,
        })
    }

    /// Record a finished operation
    pub fn record_operation(&self, kind: &str, outcome: &str, duration_seconds: f64) {
        self.operations_total
            .with_label_values(&[kind, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[kind])
            .observe(duration_seconds);
    }

    /// Record posted entries
    pub fn record_entries(&self, count: usize) {
        self.entries_total.inc_by(count as u64);
    }

    /// Record time spent waiting for row locks
    pub fn record_lock_wait(&self, wait_seconds: f64) {
        self.lock_wait.observe(wait_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.entries_total.get(), 0);

        // Independent registries do not collide
        let other = Metrics::new().unwrap();
        assert_eq!(other.entries_total.get(), 0);
    }

    #[test]
    fn test_record_operation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation("deposit", "ok", 0.002);
        metrics.record_operation("deposit", "ok", 0.003);
        metrics.record_operation("withdraw", "insufficient_funds", 0.001);

        let ok = metrics
            .operations_total
            .with_label_values(&["deposit", "ok"])
            .get();
        assert_eq!(ok, 2);
        let rejected = metrics
            .operations_total
            .with_label_values(&["withdraw", "insufficient_funds"])
            .get();
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_record_entries() {
        let metrics = Metrics::new().unwrap();
        metrics.record_entries(2);
        metrics.record_entries(2);
        assert_eq!(metrics.entries_total.get(), 4);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation("transfer", "ok", 0.001);
        metrics.record_lock_wait(0.0002);

        let text = metrics.render().unwrap();
        assert!(text.contains("ledger_operations_total"));
        assert!(text.contains("ledger_lock_wait_seconds"));
    }
}
