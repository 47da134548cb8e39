//! Per-store versioned Merkle tree.
//!
//! [`VersionedTree`] is the unit of state the multi-store mounts once per
//! sub-store. It keeps a working key-value set plus the full history of
//! committed versions, and supports:
//!
//! - committing a new version and obtaining its root hash
//! - historical reads through [`ImmutableTree`] views at any retained version
//! - Merkle inclusion proofs against a version's root
//! - deterministic export and resumable import of a version's leaves
//! - version deletion (pruning) and overwriting rollback
//!
//! # Storage model
//!
//! The tree owns a key namespace inside a [`trellis_kv::Database`] and
//! persists one changeset record and one root record per version. Historical
//! versions are materialized on demand by replaying changesets on top of the
//! base leaf set and cached with `im::OrdMap` structural sharing, so holding
//! many versions in memory is cheap. Deleting a version folds its changeset
//! into the next live version's changeset, which keeps every surviving
//! version reconstructable without rewriting history.

#![warn(missing_docs)]

mod export;
mod tree;
mod wire;

pub use export::{ExportNode, Exporter, Importer};
pub use tree::{ImmutableTree, TreeError, TreeOptions, VersionedTree};
