//! Local read execution for the tessera column store.
//!
//! A read is described by an immutable [`query::QueryDescriptor`] and
//! driven by [`pipeline::execute_locally`], which composes the storage
//! scan (or index search) with tombstone purging, threshold monitoring,
//! row filtering and limit truncation over a lazy partition stream, and
//! assembles either a full data response or a comparable digest.

pub mod config;
pub mod digest;
pub mod error;
pub mod filter;
pub mod memory;
pub mod metrics;
pub mod monitor;
pub mod partition;
pub mod pipeline;
pub mod purge;
pub mod query;
pub mod response;
pub mod wire;

pub use config::ReadConfig;
pub use error::ReadError;
pub use query::QueryDescriptor;
pub use response::ReadResponse;
