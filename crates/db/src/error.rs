use thiserror::Error;

use crate::partition::{Clustering, PartitionKey};
use crate::query::IndexId;

/// Errors surfaced by local read execution.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The query scanned more tombstones than the failure threshold
    /// allows. Fatal for the query, never retried; carries the partition
    /// key and clustering that tipped the counter over.
    #[error(
        "scanned over {tombstones} tombstones during query '{query}' on {table} \
         (partition key {key}, clustering {clustering}); query aborted \
         (see tombstone_failure_threshold)"
    )]
    TombstoneOverwhelming {
        tombstones: u64,
        query: String,
        table: String,
        key: PartitionKey,
        clustering: Clustering,
    },

    /// An index is configured on the query but cannot currently serve
    /// reads. There is no fallback to a base scan: the semantics would
    /// differ.
    #[error("index {index} is configured on this query but is not currently queryable")]
    IndexNotAvailable { index: IndexId },

    /// The query referenced an index this node does not know about.
    /// Recovered during deserialization (treated as "no index" with a
    /// logged advisory); never surfaces from execution.
    #[error("unknown index {index} referenced by query")]
    UnknownIndex { index: IndexId },

    /// Malformed or unsupported wire data, including unsupported
    /// version/flag combinations. Distinguished from data errors.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An error from the underlying storage, propagated unchanged.
    #[error("storage error: {0}")]
    Storage(String),
}
