//! Anti-entropy reconciliation for the tessera column store.
//!
//! A repair session builds a [`merkle::MerkleTree`] per endpoint over
//! the session's token range, diffs them pairwise, and runs a
//! [`task::SyncTask`] chain per pair list: differing ranges are handed
//! to a [`task::TransferDispatcher`], with a session-wide
//! [`dedup::RangeTransferDeduper`] suppressing repeat transfers of
//! content an endpoint has already been sent.

pub mod config;
pub mod dedup;
pub mod error;
pub mod job;
pub mod merkle;
pub mod metrics;
pub mod task;

pub use config::RepairConfig;
pub use dedup::RangeTransferDeduper;
pub use error::RepairError;
pub use job::{RepairJobDesc, SessionId, SyncStat};
pub use merkle::{diff, MerkleTree, RangeHash, TreeDifference};
pub use metrics::RepairMetrics;
pub use task::{SyncHandle, SyncTask, TransferDispatcher, TreeResponse};
