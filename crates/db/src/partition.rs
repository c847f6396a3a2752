//! The unfiltered partition data model and its lazy stream form.
//!
//! Partitions flow through the read pipeline as a pull-based stream of
//! [`Partition`]s, each of which lazily yields its row/marker content.
//! Transform stages (purge, threshold monitoring, filtering, limits) wrap
//! these streams without intermediate materialization; suspension points
//! sit at storage I/O boundaries only.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use tessera_primitives::Token;

use crate::error::ReadError;

/// Lazy sequence of row/marker elements within one partition.
pub type UnfilteredStream = BoxStream<'static, Result<Unfiltered, ReadError>>;

/// Lazy sequence of partitions produced by a scan or index search.
pub type PartitionStream = BoxStream<'static, Result<Partition, ReadError>>;

/// A partition key: ring token plus the raw key bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct PartitionKey {
    pub token: Token,
    pub key: Vec<u8>,
}

impl PartitionKey {
    #[must_use]
    pub fn new(token: Token, key: impl Into<Vec<u8>>) -> Self {
        Self {
            token,
            key: key.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", hex::encode(&self.key), self.token)
    }
}

/// Clustering prefix identifying a row (or marker bound) within a
/// partition. The empty clustering denotes the static row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Clustering(pub Vec<u8>);

impl Clustering {
    pub const EMPTY: Self = Self(Vec::new());

    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Display for Clustering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<static>")
        } else {
            write!(f, "{}", hex::encode(&self.0))
        }
    }
}

/// A deletion marker: write timestamp plus the local (wall-clock) second
/// it was recorded, which drives purge eligibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DeletionTime {
    pub marked_for_delete_at: i64,
    pub local_deletion_time: u32,
}

impl DeletionTime {
    /// The absence of a deletion.
    pub const LIVE: Self = Self {
        marked_for_delete_at: i64::MIN,
        local_deletion_time: u32::MAX,
    };

    #[must_use]
    pub const fn new(marked_for_delete_at: i64, local_deletion_time: u32) -> Self {
        Self {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        *self == Self::LIVE
    }
}

/// Primary-key liveness: records that the row itself was written, not
/// just its cells. Strict-liveness tables (views) require this to be live
/// for the row to exist at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LivenessInfo {
    pub timestamp: i64,
    /// For rows written with a TTL: the second at which liveness lapses.
    pub ttl_expiry: Option<u32>,
}

impl LivenessInfo {
    /// No primary-key liveness information.
    pub const EMPTY: Self = Self {
        timestamp: i64::MIN,
        ttl_expiry: None,
    };

    #[must_use]
    pub const fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            ttl_expiry: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timestamp == i64::MIN
    }

    #[must_use]
    pub fn is_live(&self, now_in_sec: u32) -> bool {
        !self.is_empty() && self.ttl_expiry.map_or(true, |expiry| now_in_sec < expiry)
    }
}

/// A single column value within a row.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Cell {
    pub column: String,
    pub timestamp: i64,
    /// Set when the cell is a tombstone: the local second the deletion
    /// was recorded.
    pub local_deletion_time: Option<u32>,
    /// Set for expiring cells: the second at which the cell dies.
    pub ttl_expiry: Option<u32>,
    pub value: Vec<u8>,
}

impl Cell {
    #[must_use]
    pub fn live(column: impl Into<String>, timestamp: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            column: column.into(),
            timestamp,
            local_deletion_time: None,
            ttl_expiry: None,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn tombstone(column: impl Into<String>, timestamp: i64, deleted_at: u32) -> Self {
        Self {
            column: column.into(),
            timestamp,
            local_deletion_time: Some(deleted_at),
            ttl_expiry: None,
            value: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_live(&self, now_in_sec: u32) -> bool {
        self.local_deletion_time.is_none()
            && self.ttl_expiry.map_or(true, |expiry| now_in_sec < expiry)
    }

    /// The local deletion second relevant to purging: explicit for
    /// tombstones, the expiry second for expired cells.
    #[must_use]
    pub fn purge_deletion_time(&self) -> Option<u32> {
        self.local_deletion_time.or(self.ttl_expiry)
    }
}

/// A row: clustering, primary-key liveness, row-level deletion, cells.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Row {
    pub clustering: Clustering,
    pub primary_key_liveness: LivenessInfo,
    pub deletion: DeletionTime,
    pub cells: Vec<Cell>,
}

impl Row {
    /// The empty static row sentinel. Purging a static row down to
    /// nothing yields this, never a hole.
    pub const EMPTY_STATIC: Self = Self {
        clustering: Clustering::EMPTY,
        primary_key_liveness: LivenessInfo::EMPTY,
        deletion: DeletionTime::LIVE,
        cells: Vec::new(),
    };

    #[must_use]
    pub fn new(clustering: Clustering, primary_key_liveness: LivenessInfo) -> Self {
        Self {
            clustering,
            primary_key_liveness,
            deletion: DeletionTime::LIVE,
            cells: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_cell(mut self, cell: Cell) -> Self {
        self.cells.push(cell);
        self
    }

    #[must_use]
    pub fn with_deletion(mut self, deletion: DeletionTime) -> Self {
        self.deletion = deletion;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.primary_key_liveness.is_empty() && self.deletion.is_live()
    }

    #[must_use]
    pub fn has_live_cell(&self, now_in_sec: u32) -> bool {
        self.cells.iter().any(|cell| cell.is_live(now_in_sec))
    }

    /// Whether the row counts as present in a result. Under strict
    /// liveness only primary-key liveness qualifies; otherwise a live
    /// cell suffices.
    #[must_use]
    pub fn is_live(&self, now_in_sec: u32, strict_liveness: bool) -> bool {
        if strict_liveness {
            self.primary_key_liveness.is_live(now_in_sec)
        } else {
            self.has_live_cell(now_in_sec) || self.primary_key_liveness.is_live(now_in_sec)
        }
    }

    /// Rough serialized weight used by byte limits.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        let cells: usize = self
            .cells
            .iter()
            .map(|cell| cell.column.len() + cell.value.len() + 16)
            .sum();
        (self.clustering.0.len() + cells + 24) as u64
    }
}

/// A range tombstone bound within a partition.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RangeTombstoneMarker {
    pub clustering: Clustering,
    pub deletion: DeletionTime,
}

/// One element of a partition's content: a row or a bare deletion marker.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Unfiltered {
    Row(Row),
    Marker(RangeTombstoneMarker),
}

impl Unfiltered {
    #[must_use]
    pub fn clustering(&self) -> &Clustering {
        match self {
            Self::Row(row) => &row.clustering,
            Self::Marker(marker) => &marker.clustering,
        }
    }

    #[must_use]
    pub fn data_size(&self) -> u64 {
        match self {
            Self::Row(row) => row.data_size(),
            Self::Marker(marker) => (marker.clustering.0.len() + 16) as u64,
        }
    }
}

/// A partition as it flows through the pipeline: header fields plus the
/// lazily-consumed content stream.
pub struct Partition {
    pub key: PartitionKey,
    pub partition_deletion: DeletionTime,
    pub static_row: Row,
    pub content: UnfilteredStream,
}

impl Partition {
    /// Build a partition over pre-materialized content. Used by in-memory
    /// storage and tests; real scans hand over lazy streams directly.
    #[must_use]
    pub fn from_content(
        key: PartitionKey,
        partition_deletion: DeletionTime,
        static_row: Row,
        content: Vec<Unfiltered>,
    ) -> Self {
        Self {
            key,
            partition_deletion,
            static_row,
            content: stream::iter(content.into_iter().map(Ok)).boxed(),
        }
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("key", &self.key)
            .field("partition_deletion", &self.partition_deletion)
            .field("static_row", &self.static_row)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_liveness() {
        let live = Cell::live("v", 10, b"x".to_vec());
        assert!(live.is_live(100));

        let dead = Cell::tombstone("v", 10, 50);
        assert!(!dead.is_live(100));
        assert_eq!(dead.purge_deletion_time(), Some(50));

        let expiring = Cell {
            ttl_expiry: Some(90),
            ..Cell::live("v", 10, b"x".to_vec())
        };
        assert!(expiring.is_live(89));
        assert!(!expiring.is_live(90));
        assert_eq!(expiring.purge_deletion_time(), Some(90));
    }

    #[test]
    fn strict_liveness_needs_primary_key() {
        let row = Row::new(Clustering::new(b"c1".to_vec()), LivenessInfo::EMPTY)
            .with_cell(Cell::live("v", 1, b"x".to_vec()));
        assert!(row.is_live(100, false));
        assert!(!row.is_live(100, true));

        let row = Row::new(Clustering::new(b"c1".to_vec()), LivenessInfo::at(1));
        assert!(row.is_live(100, true));
    }

    #[test]
    fn empty_static_row_is_empty() {
        assert!(Row::EMPTY_STATIC.is_empty());
        assert!(DeletionTime::LIVE.is_live());
        assert!(LivenessInfo::EMPTY.is_empty());
    }
}
