//! Shared value types for the tessera column store engine.
//!
//! Everything here is a plain, immutable value: content hashes, ring
//! tokens and ranges, table identity, replica endpoints. Higher layers
//! (`tessera-db`, `tessera-repair`) build on these without adding any
//! behavior of their own to them.

pub mod endpoint;
pub mod hash;
pub mod table;
pub mod token;

pub use endpoint::Endpoint;
pub use hash::Hash;
pub use table::{TableId, TableRef};
pub use token::{Token, TokenRange};
