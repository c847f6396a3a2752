//! Per-table read metrics.

use std::sync::Arc;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Read-path metrics for one table.
///
/// Register once per table with a Prometheus registry at startup; every
/// read execution updates these on completion (or at the abort site for
/// tombstone failures).
#[derive(Debug)]
pub struct TableMetrics {
    /// Reads aborted over the tombstone failure threshold.
    pub tombstone_failures: Counter,
    /// Completed reads that crossed the warn threshold.
    pub tombstone_warnings: Counter,
    /// Tombstones scanned per read.
    pub tombstone_scanned: Histogram,
    /// Live rows scanned per read.
    pub live_scanned: Histogram,
    /// Local read latency.
    pub read_latency_seconds: Histogram,
}

impl TableMetrics {
    /// Create the metric set and register it under the table's name.
    pub fn new(registry: &mut Registry, table: &str) -> Arc<Self> {
        let metrics = Self::unregistered();
        let prefix = format!("tessera_read_{}", table.replace('.', "_"));
        registry.register(
            format!("{prefix}_tombstone_failures"),
            "Reads aborted over the tombstone failure threshold",
            metrics.tombstone_failures.clone(),
        );
        registry.register(
            format!("{prefix}_tombstone_warnings"),
            "Completed reads that crossed the tombstone warn threshold",
            metrics.tombstone_warnings.clone(),
        );
        registry.register(
            format!("{prefix}_tombstone_scanned"),
            "Tombstones scanned per read",
            metrics.tombstone_scanned.clone(),
        );
        registry.register(
            format!("{prefix}_live_scanned"),
            "Live rows scanned per read",
            metrics.live_scanned.clone(),
        );
        registry.register(
            format!("{prefix}_latency_seconds"),
            "Local read latency",
            metrics.read_latency_seconds.clone(),
        );
        Arc::new(metrics)
    }

    /// A metric set not attached to any registry. Used by tests.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            tombstone_failures: Counter::default(),
            tombstone_warnings: Counter::default(),
            tombstone_scanned: Histogram::new(exponential_buckets(1.0, 4.0, 10)),
            live_scanned: Histogram::new(exponential_buckets(1.0, 4.0, 10)),
            read_latency_seconds: Histogram::new(exponential_buckets(0.000_25, 2.0, 16)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_collision() {
        let mut registry = Registry::default();
        let a = TableMetrics::new(&mut registry, "ks.events");
        let b = TableMetrics::new(&mut registry, "ks.audit");
        a.tombstone_failures.inc();
        assert_eq!(a.tombstone_failures.get(), 1);
        assert_eq!(b.tombstone_failures.get(), 0);
    }
}
