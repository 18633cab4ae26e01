//! Local persistence primitives for SuccessDesk.
//!
//! Provides the durable, client-local key-value store that backs the
//! offline operation queue. Values are opaque strings (JSON in practice).
//!
//! # Backends
//!
//! - [`DuckKvStore`]: DuckDB file, survives restarts
//! - [`MemoryKvStore`]: process-local map for tests and ephemeral sessions

mod error;
mod kv_store;
mod memory;

pub use error::{StorageError, StorageResult};
pub use kv_store::{DuckKvStore, KvStore};
pub use memory::MemoryKvStore;
