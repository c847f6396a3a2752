//! Session-level repair metrics.

use std::sync::Arc;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Debug)]
pub struct RepairMetrics {
    /// Wall time per endpoint-pair sync task.
    pub sync_duration_seconds: Histogram,
    /// Differing ranges handed to the transfer dispatcher.
    pub ranges_transferred: Counter,
    /// Differing range directions suppressed by the session deduper.
    pub ranges_deduped: Counter,
    /// Endpoint pairs whose trees matched outright.
    pub consistent_pairs: Counter,
}

impl RepairMetrics {
    pub fn new(registry: &mut Registry) -> Arc<Self> {
        let metrics = Self::unregistered();
        registry.register(
            "tessera_repair_sync_duration_seconds",
            "Wall time per endpoint-pair sync task",
            metrics.sync_duration_seconds.clone(),
        );
        registry.register(
            "tessera_repair_ranges_transferred",
            "Differing ranges handed to the transfer dispatcher",
            metrics.ranges_transferred.clone(),
        );
        registry.register(
            "tessera_repair_ranges_deduped",
            "Differing range directions suppressed by the session deduper",
            metrics.ranges_deduped.clone(),
        );
        registry.register(
            "tessera_repair_consistent_pairs",
            "Endpoint pairs whose trees matched outright",
            metrics.consistent_pairs.clone(),
        );
        Arc::new(metrics)
    }

    /// A metric set not attached to any registry. Used by tests.
    #[must_use]
    pub fn unregistered() -> Self {
        Self {
            sync_duration_seconds: Histogram::new(exponential_buckets(0.001, 2.0, 16)),
            ranges_transferred: Counter::default(),
            ranges_deduped: Counter::default(),
            consistent_pairs: Counter::default(),
        }
    }
}
