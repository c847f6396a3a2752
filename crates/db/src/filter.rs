//! Column selection, row filtering and result limits.

use std::sync::Arc;

use async_stream::try_stream;
use borsh::{BorshDeserialize, BorshSerialize};
use futures_util::StreamExt;
use futures_util::TryStreamExt;
use parking_lot::Mutex;

use crate::partition::{Partition, PartitionStream, Unfiltered};

/// Which columns a read selects. Applied at the storage boundary: scans
/// and index searches only surface selected cells.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ColumnFilter {
    All,
    Columns(Vec<String>),
}

impl ColumnFilter {
    #[must_use]
    pub fn selects(&self, column: &str) -> bool {
        match self {
            Self::All => true,
            Self::Columns(columns) => columns.iter().any(|c| c == column),
        }
    }
}

/// A single column restriction of a row filter.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Restriction {
    pub column: String,
    pub value: Vec<u8>,
}

/// Conjunction of column restrictions applied to rows.
///
/// Runs after any index search, since indexes may return false
/// positives; an index supplies a relaxed post-index variant covering
/// only the restrictions it cannot answer exactly.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RowFilter {
    pub restrictions: Vec<Restriction>,
}

impl RowFilter {
    pub const NONE: Self = Self {
        restrictions: Vec::new(),
    };

    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            restrictions: vec![Restriction {
                column: column.into(),
                value: value.into(),
            }],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.restrictions.is_empty()
    }

    /// Whether a row satisfies every restriction with a live cell.
    #[must_use]
    pub fn matches(&self, row: &crate::partition::Row, now_in_sec: u32) -> bool {
        self.restrictions.iter().all(|restriction| {
            row.cells.iter().any(|cell| {
                cell.column == restriction.column
                    && cell.is_live(now_in_sec)
                    && cell.value == restriction.value
            })
        })
    }

    /// Drop rows that fail the filter. Markers always pass through: they
    /// carry deletion information, not data.
    #[must_use]
    pub fn apply(self, partitions: PartitionStream, now_in_sec: u32) -> PartitionStream {
        if self.is_empty() {
            return partitions;
        }
        let filter = Arc::new(self);
        let stream = try_stream! {
            let mut partitions = partitions;
            while let Some(partition) = partitions.next().await {
                let partition = partition?;
                let Partition { key, partition_deletion, static_row, content } = partition;
                let filter = Arc::clone(&filter);
                let content = content
                    .try_filter(move |unfiltered| {
                        let keep = match unfiltered {
                            Unfiltered::Row(row) => filter.matches(row, now_in_sec),
                            Unfiltered::Marker(_) => true,
                        };
                        futures_util::future::ready(keep)
                    })
                    .boxed();
                yield Partition { key, partition_deletion, static_row, content };
            }
        };
        Box::pin(stream)
    }
}

/// Row, partition and byte caps on a read result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DataLimits {
    pub row_limit: Option<u64>,
    pub partition_limit: Option<u64>,
    pub bytes_limit: Option<u64>,
}

impl DataLimits {
    pub const NONE: Self = Self {
        row_limit: None,
        partition_limit: None,
        bytes_limit: None,
    };

    #[must_use]
    pub const fn rows(limit: u64) -> Self {
        Self {
            row_limit: Some(limit),
            partition_limit: None,
            bytes_limit: None,
        }
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        *self == Self::NONE
    }

    /// Truncate the stream once any cap is reached. Only live rows count
    /// toward the row limit (under strict liveness, only rows with live
    /// primary-key liveness); tombstones and markers flow through
    /// uncounted, bounded separately by the threshold monitor.
    #[must_use]
    pub fn truncate(
        self,
        partitions: PartitionStream,
        now_in_sec: u32,
        strict_liveness: bool,
    ) -> PartitionStream {
        if self.is_unlimited() {
            return partitions;
        }
        let counters = Arc::new(Mutex::new(LimitCounters::default()));
        let stream = try_stream! {
            let mut partitions = partitions;
            while let Some(partition) = partitions.next().await {
                let partition = partition?;
                if self.reached(&counters.lock()) {
                    break;
                }
                counters.lock().partitions += 1;
                let Partition { key, partition_deletion, static_row, content } = partition;
                let counters = Arc::clone(&counters);
                let content = Self::truncate_content(
                    self,
                    content,
                    counters,
                    now_in_sec,
                    strict_liveness,
                );
                yield Partition { key, partition_deletion, static_row, content };
            }
        };
        Box::pin(stream)
    }

    fn truncate_content(
        self,
        content: crate::partition::UnfilteredStream,
        counters: Arc<Mutex<LimitCounters>>,
        now_in_sec: u32,
        strict_liveness: bool,
    ) -> crate::partition::UnfilteredStream {
        let stream = try_stream! {
            let mut content = content;
            while let Some(unfiltered) = content.next().await {
                let unfiltered = unfiltered?;
                {
                    let mut counters = counters.lock();
                    counters.bytes += unfiltered.data_size();
                    if let Unfiltered::Row(ref row) = unfiltered {
                        if row.is_live(now_in_sec, strict_liveness) {
                            counters.rows += 1;
                        }
                    }
                }
                yield unfiltered;
                if self.reached(&counters.lock()) {
                    break;
                }
            }
        };
        Box::pin(stream)
    }

    fn reached(&self, counters: &LimitCounters) -> bool {
        self.row_limit.is_some_and(|limit| counters.rows >= limit)
            || self
                .partition_limit
                .is_some_and(|limit| counters.partitions >= limit)
            || self.bytes_limit.is_some_and(|limit| counters.bytes >= limit)
    }
}

#[derive(Debug, Default)]
struct LimitCounters {
    rows: u64,
    partitions: u64,
    bytes: u64,
}
