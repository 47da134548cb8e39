//! Shared types for the Trellis multi-store.
//!
//! This crate defines the cryptographic and aggregation primitives that the
//! store crates build on:
//!
//! - **Primitives**: [`Hash`] (32-byte Blake3) with deterministic construction
//!   helpers
//! - **Aggregation**: [`compute_merkle_root`] / [`prove_merkle`], binary
//!   Merkle aggregation with inclusion proofs
//! - **Commit records**: [`CommitId`], [`StoreInfo`], [`CommitInfo`] — the
//!   per-version records whose aggregated root is the multi-store root hash
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer. Wire
//! encodings live in `trellis-store`; this crate is transport-free.

#![warn(missing_docs)]

mod commit;
mod hash;

pub use commit::{CommitId, CommitInfo, StoreInfo};
pub use hash::{compute_merkle_root, prove_merkle, Hash, HexError, MerkleProof, ProofStep};
