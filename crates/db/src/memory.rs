//! In-memory storage and index implementations.
//!
//! Used by tests and by embedders that want a table backed by plain
//! memory. Scans honor the column filter at the storage boundary, the
//! same contract real storage engines implement.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ReadError;
use crate::filter::{ColumnFilter, RowFilter};
use crate::partition::{PartitionStream, Row, Unfiltered};
use crate::pipeline::{Index, IndexRegistry, ReadGuard, StorageScan};
use crate::query::{IndexId, QueryDescriptor};
use crate::response::{into_stream, PartitionData};

/// A table held entirely in memory, partitions kept in token order.
#[derive(Debug)]
pub struct MemoryTable {
    partitions: Vec<PartitionData>,
}

impl MemoryTable {
    #[must_use]
    pub fn new(mut partitions: Vec<PartitionData>) -> Arc<Self> {
        partitions.sort_by(|a, b| {
            a.key
                .token
                .cmp(&b.key.token)
                .then_with(|| a.key.key.cmp(&b.key.key))
        });
        Arc::new(Self { partitions })
    }
}

impl StorageScan for MemoryTable {
    fn scan(
        &self,
        query: &QueryDescriptor,
        _view: &ReadGuard,
    ) -> Result<PartitionStream, ReadError> {
        let selected = self
            .partitions
            .iter()
            .map(|partition| project(partition, &query.column_filter))
            .collect();
        Ok(into_stream(selected))
    }
}

/// Restrict a partition to the selected columns. Markers and deletions
/// always survive selection.
fn project(partition: &PartitionData, filter: &ColumnFilter) -> PartitionData {
    PartitionData {
        key: partition.key.clone(),
        partition_deletion: partition.partition_deletion,
        static_row: project_row(&partition.static_row, filter),
        content: partition
            .content
            .iter()
            .map(|unfiltered| match unfiltered {
                Unfiltered::Row(row) => Unfiltered::Row(project_row(row, filter)),
                Unfiltered::Marker(marker) => Unfiltered::Marker(marker.clone()),
            })
            .collect(),
    }
}

fn project_row(row: &Row, filter: &ColumnFilter) -> Row {
    Row {
        clustering: row.clustering.clone(),
        primary_key_liveness: row.primary_key_liveness,
        deletion: row.deletion,
        cells: row
            .cells
            .iter()
            .filter(|cell| filter.selects(&cell.column))
            .cloned()
            .collect(),
    }
}

/// An index with a fixed result set. Reports the full row filter as its
/// residual: its results are treated as candidates, not exact matches.
#[derive(Debug)]
pub struct StaticIndex {
    id: IndexId,
    queryable: bool,
    results: Vec<PartitionData>,
}

impl StaticIndex {
    #[must_use]
    pub fn new(id: IndexId, results: Vec<PartitionData>) -> Arc<Self> {
        Arc::new(Self {
            id,
            queryable: true,
            results,
        })
    }

    /// An index that exists but cannot currently serve reads.
    #[must_use]
    pub fn unqueryable(id: IndexId) -> Arc<Self> {
        Arc::new(Self {
            id,
            queryable: false,
            results: Vec::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> IndexId {
        self.id
    }
}

impl Index for StaticIndex {
    fn is_queryable(&self) -> bool {
        self.queryable
    }

    fn search(
        &self,
        query: &QueryDescriptor,
        _view: &ReadGuard,
    ) -> Result<PartitionStream, ReadError> {
        let selected = self
            .results
            .iter()
            .map(|partition| project(partition, &query.column_filter))
            .collect();
        Ok(into_stream(selected))
    }

    fn post_index_filter(&self, filter: &RowFilter) -> RowFilter {
        filter.clone()
    }
}

/// Index lookup over a plain map.
#[derive(Default)]
pub struct MemoryIndexes {
    indexes: HashMap<IndexId, Arc<dyn Index>>,
}

impl MemoryIndexes {
    pub fn insert(&mut self, index: Arc<StaticIndex>) {
        let _ = self.indexes.insert(index.id(), index);
    }

    #[must_use]
    pub fn contains(&self, id: IndexId) -> bool {
        self.indexes.contains_key(&id)
    }
}

impl IndexRegistry for MemoryIndexes {
    fn lookup(&self, id: IndexId) -> Option<Arc<dyn Index>> {
        self.indexes.get(&id).map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::partition::{Cell, Clustering, DeletionTime, LivenessInfo, PartitionKey};
    use crate::pipeline::{LocalViews, ViewProvider};
    use tessera_primitives::{TableId, TableRef, Token};

    fn partition(token: i64) -> PartitionData {
        PartitionData {
            key: PartitionKey::new(Token(token), vec![token as u8]),
            partition_deletion: DeletionTime::LIVE,
            static_row: Row::EMPTY_STATIC,
            content: vec![Unfiltered::Row(
                Row::new(Clustering::new(vec![0]), LivenessInfo::at(1))
                    .with_cell(Cell::live("a", 1, b"1".to_vec()))
                    .with_cell(Cell::live("b", 1, b"2".to_vec())),
            )],
        }
    }

    #[tokio::test]
    async fn scan_is_token_ordered_and_column_projected() {
        let table = MemoryTable::new(vec![partition(9), partition(2), partition(5)]);
        let views = LocalViews::new();
        let view = views
            .read_view(&TableRef::new("ks", "events", TableId(1)))
            .unwrap();

        let mut query = QueryDescriptor::new(TableRef::new("ks", "events", TableId(1)), 100);
        query.column_filter = ColumnFilter::Columns(vec!["a".into()]);

        let mut stream = table.scan(&query, &view).unwrap();
        let mut tokens = Vec::new();
        while let Some(partition) = stream.next().await {
            let mut partition = partition.unwrap();
            tokens.push(partition.key.token);
            while let Some(unfiltered) = partition.content.next().await {
                if let Unfiltered::Row(row) = unfiltered.unwrap() {
                    assert_eq!(row.cells.len(), 1);
                    assert_eq!(row.cells[0].column, "a");
                }
            }
        }
        assert_eq!(tokens, vec![Token(2), Token(5), Token(9)]);
    }

    #[test]
    fn registry_lookup() {
        let mut indexes = MemoryIndexes::default();
        indexes.insert(StaticIndex::new(IndexId(3), vec![]));
        assert!(indexes.lookup(IndexId(3)).is_some());
        assert!(indexes.lookup(IndexId(4)).is_none());
    }
}
