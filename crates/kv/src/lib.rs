//! Key-value engine seam for Trellis.
//!
//! The multi-store consumes a persistent key-value engine only through the
//! [`Database`] trait: point reads/writes, ascending range scans, and atomic
//! batches with an optional fsync. Backends live elsewhere:
//!
//! - [`MemoryDb`] (this crate): in-memory backend on `im::OrdMap`, with O(1)
//!   structural-sharing snapshots for consistent scans
//! - `trellis-kv-rocksdb`: RocksDB for production
//!
//! [`PrefixDb`] carves a namespaced view out of a shared database; this is
//! how sub-stores are isolated inside the multi-store's root database.

#![warn(missing_docs)]

mod db;
mod memory;
mod prefix;

pub use db::{Batch, BatchOp, Database, DbRef, KvError};
pub use memory::MemoryDb;
pub use prefix::{next_prefix, PrefixDb};
