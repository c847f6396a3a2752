//! Tombstone threshold monitoring over a partition stream.
//!
//! Counts live and tombstoned cells while the stream is consumed. The
//! counters are scoped to a single execution of a single query, only
//! ever increase, and are never shared between queries. Crossing the
//! failure threshold aborts the stream at the offending element;
//! crossing the warn threshold surfaces a client-visible advisory when
//! the stream terminates without aborting, including when a downstream
//! stage stops pulling early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::try_stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::config::ReadConfig;
use crate::error::ReadError;
use crate::metrics::TableMetrics;
use crate::partition::{Clustering, Partition, PartitionKey, PartitionStream, Row, Unfiltered};
use crate::query::QueryDescriptor;

/// Sink for client-visible advisories (the "client warning" channel of
/// the wire protocol; reads proceed after warning).
pub trait WarningSink: Send + Sync {
    fn warn(&self, message: String);
}

/// A warning sink that collects messages in memory.
#[derive(Debug, Default)]
pub struct ClientWarnings {
    messages: Mutex<Vec<String>>,
}

impl ClientWarnings {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut self.messages.lock())
    }
}

impl WarningSink for ClientWarnings {
    fn warn(&self, message: String) {
        self.messages.lock().push(message);
    }
}

/// Point-in-time view of the execution's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub live_rows: u64,
    pub tombstones: u64,
}

#[derive(Debug, Default)]
struct Counters {
    live_rows: u64,
    tombstones: u64,
    current_key: Option<PartitionKey>,
    aborted: bool,
}

/// Per-execution monitor: `{counting} -> {aborted | completed}`.
pub struct ThresholdMonitor {
    ctx: Arc<MonitorCtx>,
}

struct MonitorCtx {
    warn_threshold: u64,
    failure_threshold: u64,
    /// System keyspaces are exempt: internal reads are never aborted by
    /// operator-tunable thresholds.
    respect_thresholds: bool,
    strict_liveness: bool,
    now_in_sec: u32,
    query_string: String,
    table: String,
    metrics: Arc<TableMetrics>,
    warnings: Arc<dyn WarningSink>,
    started: Instant,
    fired: AtomicBool,
    counters: Mutex<Counters>,
}

/// Fires the completion hook when the monitor-wrapped stream reaches its
/// terminal state, whether it was exhausted or dropped mid-stream by a
/// downstream limit.
struct CompletionGuard(Arc<MonitorCtx>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.on_complete();
    }
}

impl ThresholdMonitor {
    #[must_use]
    pub fn new(
        query: &QueryDescriptor,
        config: &ReadConfig,
        strict_liveness: bool,
        metrics: Arc<TableMetrics>,
        warnings: Arc<dyn WarningSink>,
    ) -> Self {
        Self {
            ctx: Arc::new(MonitorCtx {
                warn_threshold: config.tombstone_warn_threshold,
                failure_threshold: config.tombstone_failure_threshold,
                respect_thresholds: !query.table.is_system_keyspace(),
                strict_liveness,
                now_in_sec: query.now_in_sec,
                query_string: query.to_query_string(),
                table: query.table.to_string(),
                metrics,
                warnings,
                started: Instant::now(),
                fired: AtomicBool::new(false),
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    /// Current counter values. Valid during and after consumption.
    #[must_use]
    pub fn counters(&self) -> CountersSnapshot {
        let counters = self.ctx.counters.lock();
        CountersSnapshot {
            live_rows: counters.live_rows,
            tombstones: counters.tombstones,
        }
    }

    /// Wrap the stream with counting. The completion hook (latency and
    /// histogram recording, warn-threshold advisory) fires when the
    /// wrapped stream terminates, exhausted or dropped early by a
    /// downstream stage alike; only a threshold abort suppresses it. An
    /// abort error terminates the stream at the offending element and
    /// nothing further is pulled.
    #[must_use]
    pub fn apply(&self, partitions: PartitionStream) -> PartitionStream {
        let ctx = Arc::clone(&self.ctx);
        let stream = try_stream! {
            let _completion = CompletionGuard(Arc::clone(&ctx));
            let mut partitions = partitions;
            while let Some(partition) = partitions.next().await {
                let partition = partition?;
                let Partition { key, partition_deletion, static_row, content } = partition;
                ctx.counters.lock().current_key = Some(key.clone());
                ctx.count_row(&key, &static_row)?;

                let inner_ctx = Arc::clone(&ctx);
                let inner_key = key.clone();
                let content = content
                    .map(move |result| {
                        result.and_then(|unfiltered| {
                            inner_ctx.count_unfiltered(&inner_key, &unfiltered)?;
                            Ok(unfiltered)
                        })
                    })
                    .boxed();

                yield Partition { key, partition_deletion, static_row, content };
            }
        };
        Box::pin(stream)
    }
}

impl MonitorCtx {
    fn count_unfiltered(&self, key: &PartitionKey, unfiltered: &Unfiltered) -> Result<(), ReadError> {
        match unfiltered {
            Unfiltered::Row(row) => self.count_row(key, row),
            Unfiltered::Marker(marker) => self.count_tombstone(key, &marker.clustering),
        }
    }

    fn count_row(&self, key: &PartitionKey, row: &Row) -> Result<(), ReadError> {
        let mut has_live_cells = false;
        let mut has_cell_tombstones = false;
        for cell in &row.cells {
            if cell.is_live(self.now_in_sec) {
                has_live_cells = true;
            } else {
                has_cell_tombstones = true;
                self.count_tombstone(key, &row.clustering)?;
            }
        }

        let pk_live = row.primary_key_liveness.is_live(self.now_in_sec);
        if (has_live_cells && !self.strict_liveness) || pk_live {
            self.counters.lock().live_rows += 1;
        } else if !row.deletion.is_live() && !has_cell_tombstones {
            // A shadowed row with no dead cells of its own: the row
            // deletion is the tombstone being scanned.
            self.count_tombstone(key, &row.clustering)?;
        }
        Ok(())
    }

    fn count_tombstone(&self, key: &PartitionKey, clustering: &Clustering) -> Result<(), ReadError> {
        let tombstones = {
            let mut counters = self.counters.lock();
            counters.tombstones += 1;
            counters.tombstones
        };
        if tombstones > self.failure_threshold && self.respect_thresholds {
            self.counters.lock().aborted = true;
            self.metrics.tombstone_failures.inc();
            trace!(
                threshold = self.failure_threshold,
                query = %self.query_string,
                "scanned over threshold tombstones; query aborted"
            );
            return Err(ReadError::TombstoneOverwhelming {
                tombstones,
                query: self.query_string.clone(),
                table: self.table.clone(),
                key: key.clone(),
                clustering: clustering.clone(),
            });
        }
        Ok(())
    }

    fn on_complete(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let (live_rows, tombstones) = {
            let counters = self.counters.lock();
            if counters.aborted {
                return;
            }
            (counters.live_rows, counters.tombstones)
        };
        self.metrics
            .read_latency_seconds
            .observe(self.started.elapsed().as_secs_f64());
        self.metrics.tombstone_scanned.observe(tombstones as f64);
        self.metrics.live_scanned.observe(live_rows as f64);

        let warn_tombstones = tombstones > self.warn_threshold && self.respect_thresholds;
        if warn_tombstones {
            let message = format!(
                "Read {live_rows} live rows and {tombstones} tombstone cells for query \
                 {} (see tombstone_warn_threshold)",
                self.query_string
            );
            self.warnings.warn(message.clone());
            if tombstones < self.failure_threshold {
                self.metrics.tombstone_warnings.inc();
            }
            warn!(table = %self.table, "{message}");
        }
        trace!(
            table = %self.table,
            live_rows,
            tombstones,
            warned = warn_tombstones,
            "read complete"
        );
    }
}
