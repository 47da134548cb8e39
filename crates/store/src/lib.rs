//! The Trellis multi-store.
//!
//! This crate implements the versioned, committing multi-store: an
//! orchestrator that groups many independently committed key-value
//! sub-stores into a single logical database with a shared version number,
//! a Merkle-aggregated root hash, atomic cross-store snapshots, version
//! rollback, pruning, and on-the-fly branching.
//!
//! # Architecture
//!
//! - [`MultiStore`] owns the registry, the version lifecycle, the
//!   commit/prune engine, the query router, and the branch factory
//! - [`SubStore`] is the closed variant of mountable store types; versioned
//!   stores wrap a `trellis_tree::VersionedTree`
//! - [`CacheMultiStore`] is an ephemeral branch; writes merge into parents
//!   only on explicit `write()`
//! - [`codec`] fixes the persisted metadata layout; [`wire`] fixes every
//!   protobuf form (commit infos, snapshot records, proof payloads)
//!
//! # Scheduling model
//!
//! A single commit driver with concurrent readers. The published commit
//! info sits behind a read/write lock; everything else that mutates is a
//! driver-side operation coordinated by the caller.

#![warn(missing_docs)]

mod block_cache;
mod cache;
pub mod codec;
mod config;
mod error;
mod key;
mod listen;
mod query;
mod snapshot;
mod store;
mod substore;
pub mod test_helpers;
mod trace;
mod upgrades;
#[allow(missing_docs)]
pub mod wire;

pub use block_cache::{BlockCacheManager, StoreCache};
pub use cache::{CacheKv, CacheMultiStore};
pub use config::PruningOptions;
pub use error::StoreError;
pub use key::{StoreKey, StoreKind, StoreType};
pub use listen::WriteListener;
pub use query::{
    codes, ProofOp, ProofOps, QueryError, QueryRequest, QueryResponse, PROOF_OP_MULTISTORE,
    PROOF_OP_TREE,
};
pub use snapshot::{SnapshotReader, SnapshotWriter};
pub use store::MultiStore;
pub use substore::{DbStore, KvView, MemStore, SubStore, TransientStore, VersionedStore};
pub use trace::TraceContext;
pub use upgrades::{StoreRename, StoreUpgrades};

// Re-export the collaborator types callers hold alongside the multi-store.
pub use trellis_tree::{ImmutableTree, TreeOptions, VersionedTree};
pub use trellis_types::{CommitId, CommitInfo, Hash, MerkleProof, StoreInfo};
