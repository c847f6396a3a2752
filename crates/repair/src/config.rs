use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_CHAINS: usize = 4;
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Operator-tunable knobs for a repair session.
#[derive(Clone, Copy, Debug)]
pub struct RepairConfig {
    /// How many endpoint-pair chains may run concurrently. Tasks within
    /// one chain are always sequential.
    pub max_concurrent_chains: usize,
    /// How long a dispatched range transfer may sit without progress
    /// before the dispatcher gives up on it.
    pub stream_timeout: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chains: DEFAULT_MAX_CONCURRENT_CHAINS,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
        }
    }
}
