//! # RocksDB backend
//!
//! Production [`trellis_kv::Database`] implementation using RocksDB.
//!
//! All operations are synchronous blocking I/O. Callers in async contexts
//! should use `spawn_blocking` if needed to avoid blocking the runtime.

mod db;

pub use db::{CompressionType, RocksDb, RocksDbConfig};
