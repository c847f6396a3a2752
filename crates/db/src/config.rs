//! Read-path configuration with named-constant defaults.

/// Default tombstone count above which a completed read logs and surfaces
/// a client-visible warning.
pub const DEFAULT_TOMBSTONE_WARN_THRESHOLD: u64 = 1_000;

/// Default tombstone count above which a read is aborted.
pub const DEFAULT_TOMBSTONE_FAILURE_THRESHOLD: u64 = 100_000;

/// Default grace period (seconds) a tombstone must age before it becomes
/// purge-eligible.
pub const DEFAULT_GC_GRACE_SECONDS: u32 = 864_000;

/// Configuration for local read execution.
#[derive(Copy, Clone, Debug)]
pub struct ReadConfig {
    /// Tombstones scanned beyond this emit a client warning.
    pub tombstone_warn_threshold: u64,

    /// Tombstones scanned beyond this abort the query.
    pub tombstone_failure_threshold: u64,

    /// Seconds a deletion must age before purging.
    pub gc_grace_seconds: u32,
}

impl ReadConfig {
    /// The deletion-time cutoff before which tombstones may be purged,
    /// evaluated against the query's liveness epoch.
    #[must_use]
    pub fn gc_before(&self, now_in_sec: u32) -> u32 {
        now_in_sec.saturating_sub(self.gc_grace_seconds)
    }
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            tombstone_warn_threshold: DEFAULT_TOMBSTONE_WARN_THRESHOLD,
            tombstone_failure_threshold: DEFAULT_TOMBSTONE_FAILURE_THRESHOLD,
            gc_grace_seconds: DEFAULT_GC_GRACE_SECONDS,
        }
    }
}
