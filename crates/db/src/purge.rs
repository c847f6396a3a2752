//! Dropping tombstones that are no longer logically necessary.

use std::sync::Arc;

use async_stream::try_stream;
use futures_util::{StreamExt, TryStreamExt};

use crate::partition::{
    DeletionTime, LivenessInfo, Partition, PartitionStream, RangeTombstoneMarker, Row, Unfiltered,
};

/// Supplier of the oldest currently-unrepaired tombstone deletion time
/// for the table. Re-read on every purge decision: compaction and repair
/// state change while a scan is in flight, so caching it per scan would
/// purge tombstones that are no longer safe to drop.
pub type OldestUnrepairedFn = dyn Fn() -> u32 + Send + Sync;

/// Rewrites a partition stream so that only logically necessary
/// tombstone markers remain.
///
/// A tombstone (cell, row, range or partition level) is purge-eligible
/// when its local deletion time is older than `gc_before`, and — when
/// `only_purge_repaired` is set — also older than the oldest unrepaired
/// tombstone known for the table. Applying the transform twice yields an
/// identical result.
pub struct PurgeTransform {
    now_in_sec: u32,
    gc_before: u32,
    oldest_unrepaired: Arc<OldestUnrepairedFn>,
    only_purge_repaired: bool,
    strict_liveness: bool,
}

impl PurgeTransform {
    #[must_use]
    pub fn new(
        now_in_sec: u32,
        gc_before: u32,
        oldest_unrepaired: Arc<OldestUnrepairedFn>,
        only_purge_repaired: bool,
        strict_liveness: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            now_in_sec,
            gc_before,
            oldest_unrepaired,
            only_purge_repaired,
            strict_liveness,
        })
    }

    /// The purge predicate over `(timestamp, local_deletion_time)`.
    #[must_use]
    pub fn should_purge(&self, _timestamp: i64, local_deletion_time: u32) -> bool {
        (!self.only_purge_repaired || local_deletion_time < (self.oldest_unrepaired)())
            && local_deletion_time < self.gc_before
    }

    #[must_use]
    pub fn apply(self: Arc<Self>, partitions: PartitionStream) -> PartitionStream {
        let stream = try_stream! {
            let mut partitions = partitions;
            while let Some(partition) = partitions.next().await {
                let partition = partition?;
                yield Arc::clone(&self).purge_partition(partition);
            }
        };
        Box::pin(stream)
    }

    fn purge_partition(self: Arc<Self>, partition: Partition) -> Partition {
        let Partition {
            key,
            partition_deletion,
            static_row,
            content,
        } = partition;

        let partition_deletion = if !partition_deletion.is_live()
            && self.should_purge(
                partition_deletion.marked_for_delete_at,
                partition_deletion.local_deletion_time,
            ) {
            DeletionTime::LIVE
        } else {
            partition_deletion
        };

        // Static rows fall back to the explicit empty sentinel, never a hole.
        let static_row = self.purge_row(&static_row).unwrap_or(Row::EMPTY_STATIC);

        let this = Arc::clone(&self);
        let content = content
            .try_filter_map(move |unfiltered| {
                futures_util::future::ready(Ok(this.purge_unfiltered(unfiltered)))
            })
            .boxed();

        Partition {
            key,
            partition_deletion,
            static_row,
            content,
        }
    }

    fn purge_unfiltered(&self, unfiltered: Unfiltered) -> Option<Unfiltered> {
        match unfiltered {
            Unfiltered::Row(row) => self.purge_row(&row).map(Unfiltered::Row),
            Unfiltered::Marker(marker) => self.purge_marker(marker).map(Unfiltered::Marker),
        }
    }

    fn purge_marker(&self, marker: RangeTombstoneMarker) -> Option<RangeTombstoneMarker> {
        if self.should_purge(
            marker.deletion.marked_for_delete_at,
            marker.deletion.local_deletion_time,
        ) {
            None
        } else {
            Some(marker)
        }
    }

    /// Purge a row's deletion, dead cells and lapsed liveness. Returns
    /// `None` when nothing necessary remains.
    fn purge_row(&self, row: &Row) -> Option<Row> {
        let deletion = if !row.deletion.is_live()
            && self.should_purge(
                row.deletion.marked_for_delete_at,
                row.deletion.local_deletion_time,
            ) {
            DeletionTime::LIVE
        } else {
            row.deletion
        };

        let cells: Vec<_> = row
            .cells
            .iter()
            .filter(|cell| {
                cell.is_live(self.now_in_sec)
                    || !cell
                        .purge_deletion_time()
                        .is_some_and(|deleted_at| self.should_purge(cell.timestamp, deleted_at))
            })
            .cloned()
            .collect();

        let liveness = row.primary_key_liveness;
        let liveness = if !liveness.is_empty()
            && !liveness.is_live(self.now_in_sec)
            && liveness
                .ttl_expiry
                .is_some_and(|expiry| self.should_purge(liveness.timestamp, expiry))
        {
            LivenessInfo::EMPTY
        } else {
            liveness
        };

        // Under strict liveness a row without primary-key liveness and
        // without a deletion carries no information.
        if self.strict_liveness && liveness.is_empty() && deletion.is_live() {
            return None;
        }

        if cells.is_empty() && liveness.is_empty() && deletion.is_live() {
            return None;
        }

        Some(Row {
            clustering: row.clustering.clone(),
            primary_key_liveness: liveness,
            deletion,
            cells,
        })
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use parking_lot::Mutex;

    use super::*;
    use crate::partition::{Cell, Clustering, PartitionKey};
    use tessera_primitives::Token;

    const NOW: u32 = 1_000;
    const GC_BEFORE: u32 = 500;

    fn transform(only_repaired: bool, oldest: u32) -> Arc<PurgeTransform> {
        PurgeTransform::new(
            NOW,
            GC_BEFORE,
            Arc::new(move || oldest),
            only_repaired,
            false,
        )
    }

    fn partition_with(content: Vec<Unfiltered>) -> Partition {
        Partition::from_content(
            PartitionKey::new(Token(1), b"pk".to_vec()),
            DeletionTime::LIVE,
            Row::EMPTY_STATIC,
            content,
        )
    }

    async fn purge_once(
        transform: Arc<PurgeTransform>,
        partition: Partition,
    ) -> (Partition, Vec<Unfiltered>) {
        let stream = futures_util::stream::iter(vec![Ok(partition)]).boxed();
        let mut purged = transform.apply(stream);
        let mut partition = purged.next().await.unwrap().unwrap();
        let mut content = Vec::new();
        while let Some(unfiltered) = partition.content.next().await {
            content.push(unfiltered.unwrap());
        }
        (partition, content)
    }

    #[tokio::test]
    async fn old_tombstones_are_purged_recent_kept() {
        let old = Unfiltered::Row(
            Row::new(Clustering::new(b"old".to_vec()), LivenessInfo::EMPTY)
                .with_cell(Cell::tombstone("v", 1, GC_BEFORE - 1)),
        );
        let recent = Unfiltered::Row(
            Row::new(Clustering::new(b"new".to_vec()), LivenessInfo::EMPTY)
                .with_cell(Cell::tombstone("v", 2, GC_BEFORE + 1)),
        );
        let (_, content) = purge_once(
            transform(false, 0),
            partition_with(vec![old, recent.clone()]),
        )
        .await;
        assert_eq!(content, vec![recent]);
    }

    #[tokio::test]
    async fn only_purge_repaired_gates_on_supplier() {
        // Tombstone is older than gc_before but not older than the oldest
        // unrepaired tombstone: must be kept.
        let row = Unfiltered::Row(
            Row::new(Clustering::new(b"c".to_vec()), LivenessInfo::EMPTY)
                .with_cell(Cell::tombstone("v", 1, 100)),
        );
        let (_, kept) = purge_once(transform(true, 50), partition_with(vec![row.clone()])).await;
        assert_eq!(kept, vec![row.clone()]);

        let (_, purged) = purge_once(transform(true, 200), partition_with(vec![row])).await;
        assert!(purged.is_empty());
    }

    #[tokio::test]
    async fn supplier_is_reread_per_decision() {
        let calls = Arc::new(Mutex::new(0_u32));
        let counting = {
            let calls = Arc::clone(&calls);
            PurgeTransform::new(
                NOW,
                GC_BEFORE,
                Arc::new(move || {
                    *calls.lock() += 1;
                    0
                }),
                true,
                false,
            )
        };
        let rows: Vec<_> = (0..3)
            .map(|i| {
                Unfiltered::Row(
                    Row::new(Clustering::new(vec![i]), LivenessInfo::EMPTY)
                        .with_cell(Cell::tombstone("v", 1, 100)),
                )
            })
            .collect();
        let _ = purge_once(counting, partition_with(rows)).await;
        assert!(*calls.lock() >= 3, "supplier must be re-read per decision");
    }

    #[tokio::test]
    async fn purging_is_idempotent() {
        let content = vec![
            Unfiltered::Row(
                Row::new(Clustering::new(b"a".to_vec()), LivenessInfo::at(1))
                    .with_cell(Cell::live("v", 1, b"x".to_vec()))
                    .with_cell(Cell::tombstone("w", 1, GC_BEFORE - 10)),
            ),
            Unfiltered::Marker(RangeTombstoneMarker {
                clustering: Clustering::new(b"m".to_vec()),
                deletion: DeletionTime::new(1, GC_BEFORE + 10),
            }),
        ];
        let (first_partition, first) =
            purge_once(transform(false, 0), partition_with(content)).await;
        let reassembled = Partition::from_content(
            first_partition.key.clone(),
            first_partition.partition_deletion,
            first_partition.static_row.clone(),
            first.clone(),
        );
        let (second_partition, second) = purge_once(transform(false, 0), reassembled).await;
        assert_eq!(first, second);
        assert_eq!(first_partition.static_row, second_partition.static_row);
        assert_eq!(
            first_partition.partition_deletion,
            second_partition.partition_deletion
        );
    }

    #[tokio::test]
    async fn purged_static_row_becomes_empty_sentinel() {
        let static_row = Row {
            clustering: Clustering::EMPTY,
            primary_key_liveness: LivenessInfo::EMPTY,
            deletion: DeletionTime::new(1, GC_BEFORE - 1),
            cells: vec![],
        };
        let partition = Partition::from_content(
            PartitionKey::new(Token(1), b"pk".to_vec()),
            DeletionTime::new(1, GC_BEFORE - 1),
            static_row,
            vec![],
        );
        let (purged, _) = purge_once(transform(false, 0), partition).await;
        assert_eq!(purged.static_row, Row::EMPTY_STATIC);
        assert!(purged.partition_deletion.is_live());
    }
}
