//! Error type for multi-store operations.
//!
//! Recoverable failures surface here and return through the call; anything
//! that would leave persistent storage inconsistent (metadata flush, pruning
//! I/O) terminates the process instead. Query failures never propagate past
//! the query boundary; they are encoded in the response.

use crate::key::StoreType;
use crate::wire::WireError;
use trellis_kv::KvError;
use trellis_tree::TreeError;

/// Error type for multi-store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `s/<version>` is missing.
    #[error("no commit info found for version {version}")]
    CommitInfoNotFound {
        /// Version whose record is missing.
        version: i64,
    },

    /// Persisted metadata failed to parse.
    #[error("corrupt store metadata: {0}")]
    CorruptMetadata(String),

    /// A sub-store failed to load.
    #[error("failed to load store {name}: {source}")]
    StoreLoad {
        /// Store name.
        name: String,
        /// Underlying tree failure.
        #[source]
        source: TreeError,
    },

    /// No mounted store under that name.
    #[error("no such store: {0}")]
    StoreNotFound(String),

    /// Transient/memory mounting requires the matching key flavor.
    #[error("unexpected key flavor for store {name}: {expected} mounting requires a {expected} key")]
    InvalidKeyKind {
        /// Store name.
        name: String,
        /// The mounting that was requested.
        expected: &'static str,
    },

    /// Rollback target must be positive.
    #[error("invalid rollback height target: {0}")]
    InvalidRollbackTarget(i64),

    /// Height 0 is not snapshotable.
    #[error("cannot snapshot height 0")]
    SnapshotHeightZero,

    /// The requested snapshot height is above the latest commit.
    #[error("cannot snapshot future height {height}, latest is {latest}")]
    SnapshotFutureHeight {
        /// Requested height.
        height: u64,
        /// Latest committed version.
        latest: i64,
    },

    /// Only versioned stores can be snapshotted.
    #[error("don't know how to snapshot store {name:?} of type {ty:?}")]
    Unsnapshottable {
        /// Store name.
        name: String,
        /// Store type.
        ty: StoreType,
    },

    /// Restore received a node record before any store record.
    #[error("received node item before store item")]
    NodeBeforeStore,

    /// Restore received a node with an out-of-range height.
    #[error("node height {0} cannot exceed 127")]
    NodeHeightTooLarge(i32),

    /// Restore targeted a store that is not versioned.
    #[error("cannot import into non-versioned store {0:?}")]
    NonVersionedImport(String),

    /// The snapshot stream framing is malformed.
    #[error("malformed snapshot stream: {0}")]
    MalformedSnapshot(String),

    /// Snapshot stream I/O failure.
    #[error("snapshot stream error: {0}")]
    SnapshotIo(#[from] std::io::Error),

    /// Backend failure.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Tree failure.
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Wire decode failure.
    #[error(transparent)]
    Wire(#[from] WireError),
}
