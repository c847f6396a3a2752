//! Session-scoped suppression of redundant range transfers.
//!
//! Several endpoint pairs in one repair session can disagree on the same
//! range with the same content hash; the range only needs to reach an
//! endpoint once. The cache lives for the session and is shared by `Arc`
//! across every sync task in it.

use std::collections::HashSet;

use dashmap::DashMap;
use tessera_primitives::Endpoint;
use tracing::trace;

use crate::merkle::RangeHash;

#[derive(Debug, Default)]
pub struct RangeTransferDeduper {
    received: DashMap<Endpoint, HashSet<RangeHash>>,
}

impl RangeTransferDeduper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `range_hash` still needs to be sent to `endpoint`,
    /// recording it as sent when it does. Check and record are atomic
    /// under the endpoint's entry guard; distinct endpoints never
    /// contend.
    ///
    /// Empty hashes are never recorded and always answer "transfer": the
    /// zero marker stands for absent content, not for content a transfer
    /// could supply again.
    pub fn check_and_record(&self, endpoint: Endpoint, range_hash: RangeHash) -> bool {
        if range_hash.is_empty() {
            return true;
        }
        let mut entry = self.received.entry(endpoint).or_default();
        let transfer = entry.insert(range_hash);
        if !transfer {
            trace!(
                %endpoint,
                range = %range_hash.range,
                "range already streamed to endpoint this session, skipping"
            );
        }
        transfer
    }

    /// Whether the pair is already recorded. Does not record.
    #[must_use]
    pub fn is_recorded(&self, endpoint: Endpoint, range_hash: &RangeHash) -> bool {
        self.received
            .get(&endpoint)
            .is_some_and(|set| set.contains(range_hash))
    }
}
