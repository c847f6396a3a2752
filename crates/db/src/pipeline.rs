//! Read execution: composing the scan with purge, threshold monitoring,
//! filtering, limits and response assembly.
//!
//! Executions for different queries run fully in parallel; every piece
//! of mutable state here is scoped to one execution. The storage read
//! view is held as an RAII guard for the whole execution, so abort and
//! error paths release it exactly like graceful completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::ReadConfig;
use crate::digest::digest_partitions;
use crate::error::ReadError;
use crate::metrics::TableMetrics;
use crate::monitor::{ThresholdMonitor, WarningSink};
use crate::partition::PartitionStream;
use crate::purge::{OldestUnrepairedFn, PurgeTransform};
use crate::query::{IndexId, QueryDescriptor};
use crate::response::{materialize, ReadResponse};
use tessera_primitives::TableRef;

/// A scoped, reference-counted view of storage state. Dropping the guard
/// releases the view; it is held for the whole execution so every exit
/// path releases it.
pub struct ReadGuard {
    active: Arc<AtomicUsize>,
}

impl ReadGuard {
    #[must_use]
    pub fn acquire(active: Arc<AtomicUsize>) -> Self {
        let _ = active.fetch_add(1, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        let _ = self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Source of read views over local storage state.
pub trait ViewProvider: Send + Sync {
    fn read_view(&self, table: &TableRef) -> Result<ReadGuard, ReadError>;
}

/// View provider over node-local state, tracking how many views are
/// currently held.
#[derive(Debug, Default)]
pub struct LocalViews {
    active: Arc<AtomicUsize>,
}

impl LocalViews {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of read views currently outstanding.
    #[must_use]
    pub fn active_views(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl ViewProvider for LocalViews {
    fn read_view(&self, _table: &TableRef) -> Result<ReadGuard, ReadError> {
        Ok(ReadGuard::acquire(Arc::clone(&self.active)))
    }
}

/// The base storage scan. Must hand back a lazily-consumed stream that
/// is safe to drop mid-way.
pub trait StorageScan: Send + Sync {
    fn scan(
        &self,
        query: &QueryDescriptor,
        view: &ReadGuard,
    ) -> Result<PartitionStream, ReadError>;
}

/// A secondary index capable of serving a read.
pub trait Index: Send + Sync {
    /// Whether the index can currently serve reads. A configured index
    /// that is not queryable fails the read; falling back to a base scan
    /// would change semantics.
    fn is_queryable(&self) -> bool;

    fn search(
        &self,
        query: &QueryDescriptor,
        view: &ReadGuard,
    ) -> Result<PartitionStream, ReadError>;

    /// The residual filter to run on the index's results. Indexes may
    /// return false positives; this keeps whatever restrictions the
    /// index cannot answer exactly.
    fn post_index_filter(&self, filter: &crate::filter::RowFilter) -> crate::filter::RowFilter;
}

/// Lookup of registered indexes by id.
pub trait IndexRegistry: Send + Sync {
    fn lookup(&self, id: IndexId) -> Option<Arc<dyn Index>>;
}

/// Everything a read execution needs about its table: storage seams,
/// metrics, and the purge policy inputs.
pub struct TableEnv {
    pub storage: Arc<dyn StorageScan>,
    pub indexes: Arc<dyn IndexRegistry>,
    pub views: Arc<dyn ViewProvider>,
    pub metrics: Arc<TableMetrics>,
    /// Oldest currently-unrepaired tombstone deletion time, re-read per
    /// purge decision.
    pub oldest_unrepaired: Arc<OldestUnrepairedFn>,
    pub only_purge_repaired: bool,
    /// Set for materialized views: a row requires live primary-key
    /// liveness to exist.
    pub strict_liveness: bool,
}

/// Execute a read against local state, producing a full data result or a
/// digest, depending on the descriptor.
pub async fn execute_locally(
    query: &QueryDescriptor,
    env: &TableEnv,
    config: &ReadConfig,
    warnings: Arc<dyn WarningSink>,
) -> Result<ReadResponse, ReadError> {
    let index = match query.index {
        Some(id) => {
            let index = env
                .indexes
                .lookup(id)
                .ok_or(ReadError::IndexNotAvailable { index: id })?;
            if !index.is_queryable() {
                return Err(ReadError::IndexNotAvailable { index: id });
            }
            trace!(table = %query.table, index = %id, "executing read using index");
            Some(index)
        }
        None => None,
    };

    let view = env.views.read_view(&query.table)?;

    let raw = match &index {
        Some(index) => index.search(query, &view)?,
        None => env.storage.scan(query, &view)?,
    };

    let purge = PurgeTransform::new(
        query.now_in_sec,
        config.gc_before(query.now_in_sec),
        Arc::clone(&env.oldest_unrepaired),
        env.only_purge_repaired,
        env.strict_liveness,
    );
    let stream = purge.apply(raw);

    let monitor = ThresholdMonitor::new(
        query,
        config,
        env.strict_liveness,
        Arc::clone(&env.metrics),
        warnings,
    );
    let stream = monitor.apply(stream);

    let row_filter = match &index {
        Some(index) => index.post_index_filter(&query.row_filter),
        None => query.row_filter.clone(),
    };
    let stream = row_filter.apply(stream, query.now_in_sec);

    let stream = query
        .limits
        .truncate(stream, query.now_in_sec, env.strict_liveness);

    let response = if let Some(version) = query.digest_version {
        let digest = digest_partitions(stream, version).await?;
        ReadResponse::Digest { digest, version }
    } else {
        ReadResponse::Data {
            partitions: materialize(stream).await?,
        }
    };

    debug!(
        table = %query.table,
        digest = query.is_digest_query(),
        "local read complete"
    );
    drop(view);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestVersion;
    use crate::filter::RowFilter;
    use crate::memory::{MemoryIndexes, MemoryTable, StaticIndex};
    use crate::monitor::ClientWarnings;
    use crate::partition::{
        Cell, Clustering, DeletionTime, LivenessInfo, PartitionKey, Row, Unfiltered,
    };
    use crate::response::PartitionData;
    use tessera_primitives::{TableId, TableRef, Token};

    const NOW: u32 = 1_000;

    fn table() -> TableRef {
        TableRef::new("ks", "events", TableId(1))
    }

    fn live_partition(token: i64, rows: u8) -> PartitionData {
        PartitionData {
            key: PartitionKey::new(Token(token), vec![token as u8]),
            partition_deletion: DeletionTime::LIVE,
            static_row: Row::EMPTY_STATIC,
            content: (0..rows)
                .map(|i| {
                    Unfiltered::Row(
                        Row::new(Clustering::new(vec![i]), LivenessInfo::at(1))
                            .with_cell(Cell::live("v", 1, vec![i])),
                    )
                })
                .collect(),
        }
    }

    fn env_for(data: Vec<PartitionData>, views: Arc<LocalViews>) -> TableEnv {
        TableEnv {
            storage: MemoryTable::new(data),
            indexes: Arc::new(MemoryIndexes::default()),
            views,
            metrics: Arc::new(TableMetrics::unregistered()),
            oldest_unrepaired: Arc::new(|| 0),
            only_purge_repaired: false,
            strict_liveness: false,
        }
    }

    #[tokio::test]
    async fn data_read_returns_rows_and_releases_view() {
        let views = LocalViews::new();
        let env = env_for(vec![live_partition(1, 5)], views.clone());
        let query = QueryDescriptor::new(table(), NOW);

        let response = execute_locally(&query, &env, &ReadConfig::default(), ClientWarnings::new())
            .await
            .unwrap();
        match response {
            ReadResponse::Data { partitions } => {
                assert_eq!(partitions.len(), 1);
                assert_eq!(partitions[0].content.len(), 5);
            }
            other => panic!("expected data response, got {other:?}"),
        }
        assert_eq!(views.active_views(), 0);
    }

    #[tokio::test]
    async fn digest_reads_are_comparable_across_replicas() {
        let views = LocalViews::new();
        let replica_a = env_for(vec![live_partition(1, 3)], views.clone());
        let replica_b = env_for(vec![live_partition(1, 3)], views.clone());
        let diverged = env_for(vec![live_partition(1, 4)], views.clone());

        let query = QueryDescriptor::new(table(), NOW).to_digest_query(DigestVersion::V2);
        let config = ReadConfig::default();

        let a = execute_locally(&query, &replica_a, &config, ClientWarnings::new())
            .await
            .unwrap();
        let b = execute_locally(&query, &replica_b, &config, ClientWarnings::new())
            .await
            .unwrap();
        let c = execute_locally(&query, &diverged, &config, ClientWarnings::new())
            .await
            .unwrap();

        assert!(a.is_digest());
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[tokio::test]
    async fn unqueryable_index_fails_fast_without_view_leak() {
        let views = LocalViews::new();
        let mut env = env_for(vec![live_partition(1, 2)], views.clone());
        let mut indexes = MemoryIndexes::default();
        indexes.insert(StaticIndex::unqueryable(IndexId(4)));
        env.indexes = Arc::new(indexes);

        let mut query = QueryDescriptor::new(table(), NOW);
        query.index = Some(IndexId(4));

        let err = execute_locally(&query, &env, &ReadConfig::default(), ClientWarnings::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::IndexNotAvailable { index } if index == IndexId(4)));
        assert_eq!(views.active_views(), 0);
    }

    #[tokio::test]
    async fn index_false_positives_are_filtered_post_index() {
        let matching = PartitionData {
            key: PartitionKey::new(Token(1), b"a".to_vec()),
            partition_deletion: DeletionTime::LIVE,
            static_row: Row::EMPTY_STATIC,
            content: vec![Unfiltered::Row(
                Row::new(Clustering::new(b"r1".to_vec()), LivenessInfo::at(1))
                    .with_cell(Cell::live("v", 1, b"yes".to_vec())),
            )],
        };
        let false_positive = PartitionData {
            key: PartitionKey::new(Token(2), b"b".to_vec()),
            partition_deletion: DeletionTime::LIVE,
            static_row: Row::EMPTY_STATIC,
            content: vec![Unfiltered::Row(
                Row::new(Clustering::new(b"r2".to_vec()), LivenessInfo::at(1))
                    .with_cell(Cell::live("v", 1, b"no".to_vec())),
            )],
        };

        let views = LocalViews::new();
        let mut env = env_for(vec![], views.clone());
        let mut indexes = MemoryIndexes::default();
        indexes.insert(StaticIndex::new(
            IndexId(9),
            vec![matching.clone(), false_positive],
        ));
        env.indexes = Arc::new(indexes);

        let mut query = QueryDescriptor::new(table(), NOW);
        query.index = Some(IndexId(9));
        query.row_filter = RowFilter::eq("v", b"yes".to_vec());

        let response = execute_locally(&query, &env, &ReadConfig::default(), ClientWarnings::new())
            .await
            .unwrap();
        match response {
            ReadResponse::Data { partitions } => {
                assert_eq!(partitions, vec![matching]);
            }
            other => panic!("expected data response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn threshold_abort_surfaces_and_releases_view() {
        let tombstoned = PartitionData {
            key: PartitionKey::new(Token(1), b"pk".to_vec()),
            partition_deletion: DeletionTime::LIVE,
            static_row: Row::EMPTY_STATIC,
            content: (0..4)
                .map(|i| {
                    Unfiltered::Row(
                        Row::new(Clustering::new(vec![i]), LivenessInfo::EMPTY)
                            .with_cell(Cell::tombstone("v", 1, NOW - 1)),
                    )
                })
                .collect(),
        };
        let views = LocalViews::new();
        let env = env_for(vec![tombstoned], views.clone());
        let config = ReadConfig {
            tombstone_failure_threshold: 3,
            ..ReadConfig::default()
        };
        let query = QueryDescriptor::new(table(), NOW);

        let err = execute_locally(&query, &env, &config, ClientWarnings::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::TombstoneOverwhelming { .. }));
        assert_eq!(views.active_views(), 0);
        assert_eq!(env.metrics.tombstone_failures.get(), 1);
    }
}
