//! Per-version commit records and their Merkle aggregation.
//!
//! Every committed version of the multi-store is described by a
//! [`CommitInfo`]: one [`StoreInfo`] per persistent sub-store, sorted
//! ascending by store name. The multi-store root hash is the binary Merkle
//! root over the leaves `hash(name_bytes || commit_hash)` in that order, so
//! the `store_infos` order is an invariant of the record — reordering
//! changes the hash.

use crate::hash::{compute_merkle_root, prove_merkle, Hash, MerkleProof};

/// The result of committing one store at one version.
///
/// The empty commit id is `(0, Hash::ZERO)`; it stands in for stores that
/// have never been committed (and serializes with empty hash bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitId {
    /// Committed version.
    pub version: i64,
    /// Root hash of the store at that version.
    pub hash: Hash,
}

impl CommitId {
    /// Construct a commit id.
    pub fn new(version: i64, hash: Hash) -> Self {
        Self { version, hash }
    }

    /// The empty commit id: version 0, zero hash.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this is the empty commit id.
    pub fn is_empty(&self) -> bool {
        self.version == 0 && self.hash.is_zero()
    }
}

/// One store's contribution to a [`CommitInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Store name (unique within the multi-store).
    pub name: String,
    /// The store's commit id at this version.
    pub commit_id: CommitId,
}

impl StoreInfo {
    /// Construct a store info.
    pub fn new(name: impl Into<String>, commit_id: CommitId) -> Self {
        Self {
            name: name.into(),
            commit_id,
        }
    }

    /// The aggregation leaf for this store: `hash(name_bytes || commit_hash)`.
    pub fn leaf_hash(&self) -> Hash {
        Hash::from_parts(&[self.name.as_bytes(), self.commit_id.hash.as_bytes()])
    }
}

/// The per-version record aggregating each sub-store's commit id.
///
/// `store_infos` is kept sorted ascending by name; the constructor enforces
/// this so that the serialized form and the root hash are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitInfo {
    version: i64,
    store_infos: Vec<StoreInfo>,
}

impl CommitInfo {
    /// Construct a commit info, sorting `store_infos` ascending by name.
    pub fn new(version: i64, mut store_infos: Vec<StoreInfo>) -> Self {
        store_infos.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            version,
            store_infos,
        }
    }

    /// The committed version this record describes.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// The per-store infos, sorted ascending by name.
    pub fn store_infos(&self) -> &[StoreInfo] {
        &self.store_infos
    }

    /// The multi-store root hash: Merkle root over the store leaves in
    /// lexical name order.
    pub fn hash(&self) -> Hash {
        let leaves: Vec<Hash> = self.store_infos.iter().map(StoreInfo::leaf_hash).collect();
        compute_merkle_root(&leaves)
    }

    /// The multi-store commit id: `(version, hash())`.
    pub fn commit_id(&self) -> CommitId {
        CommitId::new(self.version, self.hash())
    }

    /// Inclusion proof of the named store's leaf against the root.
    ///
    /// Returns `None` if no store with that name is present.
    pub fn proof(&self, store_name: &str) -> Option<MerkleProof> {
        let index = self
            .store_infos
            .binary_search_by(|info| info.name.as_str().cmp(store_name))
            .ok()?;
        let leaves: Vec<Hash> = self.store_infos.iter().map(StoreInfo::leaf_hash).collect();
        prove_merkle(&leaves, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, version: i64, seed: &[u8]) -> StoreInfo {
        StoreInfo::new(name, CommitId::new(version, Hash::from_bytes(seed)))
    }

    #[test]
    fn test_empty_commit_id() {
        assert!(CommitId::empty().is_empty());
        assert!(!CommitId::new(1, Hash::ZERO).is_empty());
        assert!(!CommitId::new(0, Hash::from_bytes(b"x")).is_empty());
    }

    #[test]
    fn test_commit_info_sorts_by_name() {
        let ci = CommitInfo::new(
            3,
            vec![info("bank", 3, b"b"), info("acc", 3, b"a"), info("gov", 3, b"g")],
        );
        let names: Vec<&str> = ci.store_infos().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["acc", "bank", "gov"]);
    }

    #[test]
    fn test_hash_is_order_independent_of_input() {
        // Same infos in different input orders must agree once normalized.
        let a = CommitInfo::new(1, vec![info("x", 1, b"1"), info("y", 1, b"2")]);
        let b = CommitInfo::new(1, vec![info("y", 1, b"2"), info("x", 1, b"1")]);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_depends_on_name_and_store_hash() {
        let base = CommitInfo::new(1, vec![info("x", 1, b"1")]);
        let renamed = CommitInfo::new(1, vec![info("z", 1, b"1")]);
        let rehashed = CommitInfo::new(1, vec![info("x", 1, b"other")]);
        assert_ne!(base.hash(), renamed.hash());
        assert_ne!(base.hash(), rehashed.hash());
    }

    #[test]
    fn test_empty_commit_info_hash_is_zero() {
        let ci = CommitInfo::new(0, vec![]);
        assert_eq!(ci.hash(), Hash::ZERO);
        assert!(ci.commit_id().is_empty());
    }

    #[test]
    fn test_proof_verifies_each_store() {
        let ci = CommitInfo::new(
            5,
            vec![info("a", 5, b"1"), info("b", 5, b"2"), info("c", 5, b"3")],
        );
        let root = ci.hash();
        for store in ci.store_infos() {
            let proof = ci.proof(&store.name).unwrap();
            assert_eq!(proof.root_from(store.leaf_hash()), root);
        }
        assert!(ci.proof("missing").is_none());
    }
}
