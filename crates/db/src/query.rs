//! The immutable read descriptor.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_primitives::TableRef;

use crate::digest::DigestVersion;
use crate::filter::{ColumnFilter, DataLimits, RowFilter};

/// Identifier of a secondary index.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx#{}", self.0)
    }
}

/// Longest query string rendered into warnings and errors.
const MAX_QUERY_STRING_LEN: usize = 512;

/// Immutable description of a read: what to scan, how to filter it, and
/// whether to return data or a digest.
///
/// Two descriptors are equal iff every field compares equal; this is how
/// identical in-flight queries are detected. A descriptor is owned by the
/// caller that issued the read and never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryDescriptor {
    pub table: TableRef,
    /// Epoch second at which cell/row liveness is evaluated.
    pub now_in_sec: u32,
    pub column_filter: ColumnFilter,
    pub row_filter: RowFilter,
    pub limits: DataLimits,
    pub index: Option<IndexId>,
    /// Set when this is a digest query, carrying the digest algorithm
    /// version negotiated with the peer.
    pub digest_version: Option<DigestVersion>,
}

impl QueryDescriptor {
    #[must_use]
    pub fn new(table: TableRef, now_in_sec: u32) -> Self {
        Self {
            table,
            now_in_sec,
            column_filter: ColumnFilter::All,
            row_filter: RowFilter::NONE,
            limits: DataLimits::NONE,
            index: None,
            digest_version: None,
        }
    }

    #[must_use]
    pub fn is_digest_query(&self) -> bool {
        self.digest_version.is_some()
    }

    /// The same read, reissued as a digest query.
    #[must_use]
    pub fn to_digest_query(&self, version: DigestVersion) -> Self {
        let mut query = self.clone();
        query.digest_version = Some(version);
        query
    }

    /// CQL-shaped rendering used in warnings and abort errors, truncated
    /// to a bounded length.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let columns = match &self.column_filter {
            ColumnFilter::All => "*".to_owned(),
            ColumnFilter::Columns(columns) => columns.join(", "),
        };
        let mut out = format!("SELECT {columns} FROM {}", self.table);
        if !self.row_filter.is_empty() {
            out.push_str(" WHERE ");
            for (i, restriction) in self.row_filter.restrictions.iter().enumerate() {
                if i > 0 {
                    out.push_str(" AND ");
                }
                out.push_str(&restriction.column);
                out.push_str(" = 0x");
                out.push_str(&hex::encode(&restriction.value));
            }
        }
        if let Some(limit) = self.limits.row_limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        if out.len() > MAX_QUERY_STRING_LEN {
            out.truncate(MAX_QUERY_STRING_LEN);
        }
        out
    }
}
