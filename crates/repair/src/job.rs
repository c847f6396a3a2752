//! Descriptors and results of repair work.

use std::fmt;

use tessera_primitives::{Endpoint, TokenRange};

/// Identifier of one repair session. All tasks spawned for the session
/// share it, and per-session state (the transfer deduper) is keyed off
/// its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repair#{}", self.0)
    }
}

/// What one repair job covers. Read-only, threaded through every task of
/// the job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepairJobDesc {
    pub session_id: SessionId,
    pub keyspace: String,
    pub table: String,
    pub range: TokenRange,
}

impl RepairJobDesc {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        keyspace: impl Into<String>,
        table: impl Into<String>,
        range: TokenRange,
    ) -> Self {
        Self {
            session_id,
            keyspace: keyspace.into(),
            table: table.into(),
            range,
        }
    }
}

impl fmt::Display for RepairJobDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{} on {}",
            self.session_id, self.keyspace, self.table, self.range
        )
    }
}

/// Outcome summary of one endpoint pair: how many ranges disagreed,
/// whether or not their transfer was deduplicated away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncStat {
    pub endpoints: (Endpoint, Endpoint),
    pub differing_ranges: u64,
}

impl SyncStat {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.differing_ranges == 0
    }
}
