//! The versioned tree proper.

use crate::export::Exporter;
use crate::wire::{decode_changeset, encode_changeset, ChangeSet};
use im::OrdMap;
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};
use trellis_kv::{next_prefix, Batch, DbRef, KvError};
use trellis_types::{compute_merkle_root, prove_merkle, CommitId, Hash, MerkleProof};

/// Key layout inside the tree's namespace:
///
/// - `m/base`   → be64, version whose full leaf set lives under `b/`
/// - `m/latest` → be64, highest version on disk
/// - `r/<be64>` → 32-byte root hash of that version (presence = version lives)
/// - `c/<be64>` → changeset record from the previous version
/// - `b/<key>`  → base leaf set (only populated by snapshot import)
const META_BASE_KEY: &[u8] = b"m/base";
const META_LATEST_KEY: &[u8] = b"m/latest";
const ROOT_PREFIX: &[u8] = b"r/";
const CHANGESET_PREFIX: &[u8] = b"c/";
const BASE_LEAF_PREFIX: &[u8] = b"b/";

type Leaves = OrdMap<Vec<u8>, Vec<u8>>;

/// Error type for tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The requested version was never committed or has been pruned.
    #[error("version {0} does not exist")]
    VersionDoesNotExist(i64),

    /// Stored root does not match the commit id the caller expected.
    #[error("root hash mismatch at version {version}: expected {expected}, got {actual}")]
    RootMismatch {
        /// Version being loaded.
        version: i64,
        /// Hash the caller expected.
        expected: Hash,
        /// Hash found on disk.
        actual: Hash,
    },

    /// A version at or above the latest commit cannot be deleted.
    #[error("cannot delete version {0} at or above the latest commit")]
    DeleteLatest(i64),

    /// Snapshot import requires an empty tree.
    #[error("cannot import into a non-empty tree")]
    NonEmptyImport,

    /// Persisted records are inconsistent.
    #[error("corrupt tree state: {0}")]
    Corrupt(String),

    /// Backend failure.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Persisted record failed to decode.
    #[error("failed to decode tree record: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Tuning knobs for a [`VersionedTree`].
#[derive(Debug, Clone, Copy)]
pub struct TreeOptions {
    /// Maximum number of materialized historical snapshots kept in memory.
    ///
    /// Snapshots share structure, so the cost of a cached version is the
    /// delta against its neighbors, not the full leaf set.
    pub snapshot_cache: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self { snapshot_cache: 16 }
    }
}

struct TreeInner {
    /// State as of the last commit.
    committed: Leaves,
    /// Committed state plus pending writes.
    working: Leaves,
    /// Writes since the last commit, in key order.
    pending: ChangeSet,
    /// Latest committed version of this handle.
    version: i64,
    /// Root hash at `version`.
    root: Hash,
    /// Highest version present on disk (≥ `version` after loading an old one).
    disk_latest: i64,
    /// Version whose full leaf set is materialized under `b/` (0 = empty).
    base_version: i64,
    /// Applied to the first commit of an empty tree.
    initial_version: i64,
}

/// A versioned Merkle tree over one key namespace.
///
/// All methods take `&self`; the working state lives behind a lock so the
/// multi-store can hand out shared handles. The root hash of a version is
/// the binary Merkle root over `hash(key || value)` leaves in key order.
pub struct VersionedTree {
    db: DbRef,
    options: TreeOptions,
    inner: RwLock<TreeInner>,
    /// Materialized historical snapshots, bounded by `options.snapshot_cache`.
    snapshots: Mutex<BTreeMap<i64, Leaves>>,
}

impl VersionedTree {
    /// Load the tree at the version named by `target`.
    ///
    /// An empty `target` loads an empty tree. Otherwise the version must
    /// exist on disk, and if `target.hash` is non-zero it must match the
    /// stored root.
    pub fn load(db: DbRef, target: CommitId, options: TreeOptions) -> Result<Self, TreeError> {
        Self::load_inner(db, target, 0, options)
    }

    /// Load with an initial version, applied to the first commit of an
    /// empty tree. Used when a store is added by an upgrade so its history
    /// starts at the multi-store's next version.
    pub fn load_with_initial_version(
        db: DbRef,
        target: CommitId,
        initial_version: i64,
        options: TreeOptions,
    ) -> Result<Self, TreeError> {
        Self::load_inner(db, target, initial_version, options)
    }

    fn load_inner(
        db: DbRef,
        target: CommitId,
        initial_version: i64,
        options: TreeOptions,
    ) -> Result<Self, TreeError> {
        let base_version = read_meta_version(&db, META_BASE_KEY)?.unwrap_or(0);
        let disk_latest = read_meta_version(&db, META_LATEST_KEY)?.unwrap_or(0);

        let (leaves, root) = if target.version == 0 {
            (Leaves::new(), Hash::ZERO)
        } else {
            let root = read_root(&db, target.version)?
                .ok_or(TreeError::VersionDoesNotExist(target.version))?;
            if !target.hash.is_zero() && target.hash != root {
                return Err(TreeError::RootMismatch {
                    version: target.version,
                    expected: target.hash,
                    actual: root,
                });
            }
            let leaves = materialize(&db, base_version, target.version, None)?;
            (leaves, root)
        };

        tracing::debug!(
            version = target.version,
            disk_latest,
            base_version,
            keys = leaves.len(),
            "loaded versioned tree"
        );

        Ok(Self {
            db,
            options,
            inner: RwLock::new(TreeInner {
                committed: leaves.clone(),
                working: leaves,
                pending: ChangeSet::new(),
                version: target.version,
                root,
                disk_latest,
                base_version,
                initial_version,
            }),
            snapshots: Mutex::new(BTreeMap::new()),
        })
    }

    // ── Working-state access ─────────────────────────────────────────

    /// Read a key from the working state.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().unwrap().working.get(key).cloned()
    }

    /// Whether the working state contains a key.
    pub fn has(&self, key: &[u8]) -> bool {
        self.inner.read().unwrap().working.contains_key(key)
    }

    /// Write a key into the working state. Takes effect at the next commit.
    pub fn set(&self, key: &[u8], value: &[u8]) {
        let mut inner = self.inner.write().unwrap();
        inner.working.insert(key.to_vec(), value.to_vec());
        inner.pending.insert(key.to_vec(), Some(value.to_vec()));
    }

    /// Delete a key from the working state. Takes effect at the next commit.
    pub fn delete(&self, key: &[u8]) {
        let mut inner = self.inner.write().unwrap();
        inner.working.remove(key);
        inner.pending.insert(key.to_vec(), None);
    }

    /// Ascending scan over the working state, `[start, end)`.
    ///
    /// Iterates a snapshot taken at call time.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)>> {
        let snapshot = self.inner.read().unwrap().working.clone();
        scan_leaves(snapshot, start, end)
    }

    // ── Version surface ──────────────────────────────────────────────

    /// Latest committed version of this handle.
    pub fn version(&self) -> i64 {
        self.inner.read().unwrap().version
    }

    /// Commit id of the latest committed version.
    pub fn last_commit_id(&self) -> CommitId {
        let inner = self.inner.read().unwrap();
        CommitId::new(inner.version, inner.root)
    }

    /// Root hash the next commit would produce, without committing.
    pub fn working_hash(&self) -> Hash {
        compute_root(&self.inner.read().unwrap().working)
    }

    /// Set the version the first commit of an empty tree will use.
    pub fn set_initial_version(&self, version: i64) {
        self.inner.write().unwrap().initial_version = version;
    }

    /// Commit pending writes.
    ///
    /// With `bump_version` the commit creates the next version; without it,
    /// the current version is re-committed in place (its changeset absorbs
    /// the pending writes). The first commit of an empty tree lands on the
    /// initial version (or 1).
    ///
    /// # Panics
    ///
    /// Panics on backend write failure: a half-persisted version is
    /// unrecoverable, per the storage consistency policy.
    pub fn commit(&self, bump_version: bool) -> CommitId {
        let mut inner = self.inner.write().unwrap();

        let next = if inner.version == 0 {
            if inner.initial_version > 1 {
                inner.initial_version
            } else {
                1
            }
        } else if bump_version {
            inner.version + 1
        } else {
            inner.version
        };

        let leaves = inner.working.clone();
        let root = compute_root(&leaves);

        // A re-commit folds the pending writes into the version's existing
        // changeset so replay still reproduces this state from next - 1.
        let changeset = if next == inner.version {
            match self.read_changeset(next) {
                Ok(Some(mut existing)) => {
                    existing.extend(inner.pending.clone());
                    existing
                }
                _ => inner.pending.clone(),
            }
        } else {
            inner.pending.clone()
        };

        let mut batch = Batch::new();
        batch.set(changeset_key(next), encode_changeset(&changeset));
        batch.set(root_key(next), root.to_bytes().to_vec());
        batch.set(META_LATEST_KEY.to_vec(), encode_be64(next));

        // Committing divergent state below a higher history (after loading
        // an old version) overwrites forward: the abandoned versions are
        // dropped so the namespace holds a single linear history. An
        // unchanged re-commit of the current version leaves them intact.
        let truncates = inner.disk_latest > next && (bump_version || !inner.pending.is_empty());
        if truncates {
            for stale in self.list_versions(CHANGESET_PREFIX, next + 1) {
                batch.delete(changeset_key(stale));
            }
            for stale in self.list_versions(ROOT_PREFIX, next + 1) {
                batch.delete(root_key(stale));
            }
        }

        self.db
            .write_batch(batch, false)
            .expect("STATE CRITICAL: failed to persist tree version");

        inner.committed = leaves.clone();
        inner.pending.clear();
        inner.version = next;
        inner.root = root;
        inner.disk_latest = if truncates {
            next
        } else {
            inner.disk_latest.max(next)
        };
        drop(inner);

        let mut snapshots = self.snapshots.lock().unwrap();
        let _ = snapshots.split_off(&next); // drop any stale higher snapshots
        snapshots.insert(next, leaves);
        trim_snapshots(&mut snapshots, self.options.snapshot_cache);

        CommitId::new(next, root)
    }

    /// An immutable view of the tree at `version`.
    ///
    /// Fails if the version was never committed or has been pruned.
    pub fn get_immutable(&self, version: i64) -> Result<ImmutableTree, TreeError> {
        let (current_version, disk_latest, base_version, committed, current_root) = {
            let inner = self.inner.read().unwrap();
            (
                inner.version,
                inner.disk_latest,
                inner.base_version,
                inner.committed.clone(),
                inner.root,
            )
        };

        if version <= 0 || version > current_version.max(disk_latest) {
            return Err(TreeError::VersionDoesNotExist(version));
        }
        if version == current_version {
            return Ok(ImmutableTree {
                version,
                root: current_root,
                leaves: committed,
            });
        }

        let root =
            read_root(&self.db, version)?.ok_or(TreeError::VersionDoesNotExist(version))?;

        let mut snapshots = self.snapshots.lock().unwrap();
        let leaves = if let Some(hit) = snapshots.get(&version) {
            hit.clone()
        } else {
            // Start from the nearest cached snapshot at or below the target.
            let seed = snapshots
                .range(..=version)
                .next_back()
                .map(|(v, leaves)| (*v, leaves.clone()));
            let leaves = materialize(&self.db, base_version, version, seed)?;
            snapshots.insert(version, leaves.clone());
            trim_snapshots(&mut snapshots, self.options.snapshot_cache);
            leaves
        };

        Ok(ImmutableTree {
            version,
            root,
            leaves,
        })
    }

    /// Delete committed versions (pruning).
    ///
    /// Each deleted version's changeset is folded into the next live
    /// version's changeset, so all surviving versions stay reconstructable.
    /// Versions already pruned (or never committed) yield
    /// [`TreeError::VersionDoesNotExist`]; the latest version cannot be
    /// deleted.
    pub fn delete_versions(&self, versions: &[i64]) -> Result<(), TreeError> {
        if versions.is_empty() {
            return Ok(());
        }

        let mut targets = versions.to_vec();
        targets.sort_unstable();
        targets.dedup();

        let inner = self.inner.read().unwrap();
        let latest = inner.version.max(inner.disk_latest);
        drop(inner);

        // Changesets rewritten during this pass, keyed by version.
        let mut rewritten: BTreeMap<i64, ChangeSet> = BTreeMap::new();
        let mut deleted: Vec<i64> = Vec::new();

        for &version in &targets {
            if version >= latest {
                return Err(TreeError::DeleteLatest(version));
            }
            if read_root(&self.db, version)?.is_none() {
                return Err(TreeError::VersionDoesNotExist(version));
            }

            let ops = match rewritten.remove(&version) {
                Some(ops) => ops,
                None => self.read_changeset(version)?.ok_or_else(|| {
                    TreeError::Corrupt(format!("version {version} has a root but no changeset"))
                })?,
            };

            // The next live changeset absorbs this version's ops (its own
            // ops win on conflict).
            let successor = self
                .list_versions(CHANGESET_PREFIX, version + 1)
                .into_iter()
                .find(|v| !deleted.contains(v))
                .ok_or_else(|| {
                    TreeError::Corrupt(format!("version {version} has no live successor"))
                })?;
            let successor_ops = match rewritten.get(&successor) {
                Some(ops) => ops.clone(),
                None => self.read_changeset(successor)?.ok_or_else(|| {
                    TreeError::Corrupt(format!("version {successor} has a root but no changeset"))
                })?,
            };

            let mut merged = ops;
            merged.extend(successor_ops);
            rewritten.insert(successor, merged);
            deleted.push(version);
        }

        let mut batch = Batch::new();
        for &version in &deleted {
            batch.delete(changeset_key(version));
            batch.delete(root_key(version));
        }
        for (version, ops) in &rewritten {
            batch.set(changeset_key(*version), encode_changeset(ops));
        }
        self.db.write_batch(batch, false)?;

        let mut snapshots = self.snapshots.lock().unwrap();
        for version in &deleted {
            snapshots.remove(version);
        }

        tracing::debug!(count = deleted.len(), "pruned tree versions");
        Ok(())
    }

    /// Load `target` as the latest version, discarding everything above it.
    ///
    /// The tree is left mutable at `target`; the next bumped commit creates
    /// `target + 1`. Returns the new latest version.
    pub fn load_version_for_overwriting(&self, target: i64) -> Result<i64, TreeError> {
        let root = read_root(&self.db, target)?.ok_or(TreeError::VersionDoesNotExist(target))?;
        let base_version = self.inner.read().unwrap().base_version;
        let leaves = materialize(&self.db, base_version, target, None)?;

        let mut batch = Batch::new();
        for stale in self.list_versions(CHANGESET_PREFIX, target + 1) {
            batch.delete(changeset_key(stale));
        }
        for stale in self.list_versions(ROOT_PREFIX, target + 1) {
            batch.delete(root_key(stale));
        }
        batch.set(META_LATEST_KEY.to_vec(), encode_be64(target));
        self.db.write_batch(batch, false)?;

        let mut inner = self.inner.write().unwrap();
        inner.committed = leaves.clone();
        inner.working = leaves;
        inner.pending.clear();
        inner.version = target;
        inner.root = root;
        inner.disk_latest = target;
        drop(inner);

        let _ = self.snapshots.lock().unwrap().split_off(&(target + 1));

        Ok(target)
    }

    /// Open a deterministic exporter over the tree at `version`.
    pub fn export(&self, version: i64) -> Result<Exporter, TreeError> {
        Ok(Exporter::new(self.get_immutable(version)?))
    }

    pub(crate) fn finish_import(&self, version: i64, leaves: Leaves) -> Result<CommitId, TreeError> {
        {
            let inner = self.inner.read().unwrap();
            if inner.version != 0 || inner.disk_latest != 0 {
                return Err(TreeError::NonEmptyImport);
            }
        }

        let root = compute_root(&leaves);
        let mut batch = Batch::new();
        for (key, value) in leaves.iter() {
            batch.set(base_leaf_key(key), value.clone());
        }
        batch.set(META_BASE_KEY.to_vec(), encode_be64(version));
        batch.set(META_LATEST_KEY.to_vec(), encode_be64(version));
        batch.set(root_key(version), root.to_bytes().to_vec());
        self.db.write_batch(batch, false)?;

        let mut inner = self.inner.write().unwrap();
        inner.committed = leaves.clone();
        inner.working = leaves;
        inner.pending.clear();
        inner.version = version;
        inner.root = root;
        inner.disk_latest = version;
        inner.base_version = version;

        Ok(CommitId::new(version, root))
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn read_changeset(&self, version: i64) -> Result<Option<ChangeSet>, TreeError> {
        match self.db.get(&changeset_key(version))? {
            Some(bytes) => Ok(Some(decode_changeset(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Versions with a record under `prefix`, ascending, starting at `from`.
    fn list_versions(&self, prefix: &[u8], from: i64) -> Vec<i64> {
        let start = versioned_key(prefix, from);
        let end = next_prefix(prefix);
        self.db
            .scan(Some(&start), end.as_deref())
            .filter_map(|(key, _)| parse_version(&key, prefix.len()))
            .collect()
    }
}

/// A read-only view of one committed version.
///
/// The view is detached: later commits or pruning on the parent tree do not
/// affect it (structural sharing keeps the detachment cheap).
#[derive(Clone)]
pub struct ImmutableTree {
    version: i64,
    root: Hash,
    leaves: Leaves,
}

impl ImmutableTree {
    /// The version this view is frozen at.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Root hash at this version.
    pub fn root_hash(&self) -> Hash {
        self.root
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Point read.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.leaves.get(key).cloned()
    }

    /// Ascending scan over `[start, end)`.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)>> {
        scan_leaves(self.leaves.clone(), start, end)
    }

    /// Point read with an inclusion proof against [`Self::root_hash`].
    ///
    /// Absent keys return `(None, None)`: this tree proves inclusion only.
    pub fn get_with_proof(&self, key: &[u8]) -> (Option<Vec<u8>>, Option<MerkleProof>) {
        let value = match self.leaves.get(key) {
            Some(value) => value.clone(),
            None => return (None, None),
        };

        let mut leaf_hashes = Vec::with_capacity(self.leaves.len());
        let mut index = 0;
        for (i, (k, v)) in self.leaves.iter().enumerate() {
            if k.as_slice() == key {
                index = i;
            }
            leaf_hashes.push(leaf_hash(k, v));
        }

        let proof = prove_merkle(&leaf_hashes, index);
        (Some(value), proof)
    }

    pub(crate) fn into_leaves(self) -> Leaves {
        self.leaves
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Free helpers
// ═══════════════════════════════════════════════════════════════════════

fn leaf_hash(key: &[u8], value: &[u8]) -> Hash {
    Hash::from_parts(&[key, value])
}

fn compute_root(leaves: &Leaves) -> Hash {
    let hashes: Vec<Hash> = leaves.iter().map(|(k, v)| leaf_hash(k, v)).collect();
    compute_merkle_root(&hashes)
}

fn scan_leaves(
    snapshot: Leaves,
    start: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)>> {
    let start = start.map(<[u8]>::to_vec);
    let end = end.map(<[u8]>::to_vec);
    Box::new(
        snapshot
            .into_iter()
            .skip_while(move |(k, _)| match &start {
                Some(s) => k.as_slice() < s.as_slice(),
                None => false,
            })
            .take_while(move |(k, _)| match &end {
                Some(e) => k.as_slice() < e.as_slice(),
                None => true,
            }),
    )
}

fn encode_be64(version: i64) -> Vec<u8> {
    (version as u64).to_be_bytes().to_vec()
}

fn versioned_key(prefix: &[u8], version: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&(version as u64).to_be_bytes());
    key
}

fn changeset_key(version: i64) -> Vec<u8> {
    versioned_key(CHANGESET_PREFIX, version)
}

fn root_key(version: i64) -> Vec<u8> {
    versioned_key(ROOT_PREFIX, version)
}

fn base_leaf_key(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BASE_LEAF_PREFIX.len() + key.len());
    out.extend_from_slice(BASE_LEAF_PREFIX);
    out.extend_from_slice(key);
    out
}

fn parse_version(key: &[u8], prefix_len: usize) -> Option<i64> {
    let suffix: [u8; 8] = key.get(prefix_len..)?.try_into().ok()?;
    Some(u64::from_be_bytes(suffix) as i64)
}

fn read_meta_version(db: &DbRef, key: &[u8]) -> Result<Option<i64>, TreeError> {
    match db.get(key)? {
        None => Ok(None),
        Some(bytes) => {
            let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                TreeError::Corrupt(format!(
                    "meta key {} has length {}, want 8",
                    String::from_utf8_lossy(key),
                    bytes.len()
                ))
            })?;
            Ok(Some(u64::from_be_bytes(arr) as i64))
        }
    }
}

fn read_root(db: &DbRef, version: i64) -> Result<Option<Hash>, TreeError> {
    match db.get(&root_key(version))? {
        None => Ok(None),
        Some(bytes) if bytes.len() == Hash::BYTES => Ok(Some(Hash::from_hash_bytes(&bytes))),
        Some(bytes) => Err(TreeError::Corrupt(format!(
            "root record for version {version} has length {}, want {}",
            bytes.len(),
            Hash::BYTES
        ))),
    }
}

/// Rebuild the leaf set at `version` by replaying changesets on top of the
/// base leaf set (or a nearer cached snapshot).
fn materialize(
    db: &DbRef,
    base_version: i64,
    version: i64,
    seed: Option<(i64, Leaves)>,
) -> Result<Leaves, TreeError> {
    if version < base_version {
        return Err(TreeError::VersionDoesNotExist(version));
    }

    let (from, mut leaves) = match seed {
        Some((seed_version, leaves)) if seed_version >= base_version => (seed_version, leaves),
        _ => {
            let mut leaves = Leaves::new();
            let end = next_prefix(BASE_LEAF_PREFIX);
            for (key, value) in db.scan(Some(BASE_LEAF_PREFIX), end.as_deref()) {
                leaves.insert(key[BASE_LEAF_PREFIX.len()..].to_vec(), value);
            }
            (base_version, leaves)
        }
    };

    if from == version {
        return Ok(leaves);
    }

    let start = versioned_key(CHANGESET_PREFIX, from + 1);
    let end = versioned_key(CHANGESET_PREFIX, version + 1);
    for (key, bytes) in db.scan(Some(&start), Some(&end)) {
        debug_assert!(parse_version(&key, CHANGESET_PREFIX.len()).is_some());
        for (k, op) in decode_changeset(&bytes)? {
            match op {
                Some(value) => {
                    leaves.insert(k, value);
                }
                None => {
                    leaves.remove(&k);
                }
            }
        }
    }

    Ok(leaves)
}

fn trim_snapshots(snapshots: &mut BTreeMap<i64, Leaves>, cap: usize) {
    while snapshots.len() > cap.max(1) {
        snapshots.pop_first();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trellis_kv::MemoryDb;

    fn fresh_tree() -> VersionedTree {
        let db: DbRef = Arc::new(MemoryDb::new());
        VersionedTree::load(db, CommitId::empty(), TreeOptions::default()).unwrap()
    }

    #[test]
    fn test_first_commit_is_version_one() {
        let tree = fresh_tree();
        tree.set(b"k", b"v");
        let id = tree.commit(true);
        assert_eq!(id.version, 1);
        assert!(!id.hash.is_zero());
        assert_eq!(tree.last_commit_id(), id);
    }

    #[test]
    fn test_initial_version_applies_to_first_commit() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let tree = VersionedTree::load_with_initial_version(
            db,
            CommitId::empty(),
            5,
            TreeOptions::default(),
        )
        .unwrap();
        tree.set(b"k", b"v");
        assert_eq!(tree.commit(true).version, 5);
        assert_eq!(tree.commit(true).version, 6);
    }

    #[test]
    fn test_working_hash_previews_commit() {
        let tree = fresh_tree();
        tree.set(b"k", b"v");
        let preview = tree.working_hash();
        let id = tree.commit(true);
        assert_eq!(preview, id.hash);
    }

    #[test]
    fn test_root_is_deterministic_across_instances() {
        let build = || {
            let tree = fresh_tree();
            tree.set(b"a", b"1");
            tree.set(b"b", b"2");
            tree.commit(true).hash
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_delete_changes_root() {
        let tree = fresh_tree();
        tree.set(b"a", b"1");
        tree.set(b"b", b"2");
        let r1 = tree.commit(true).hash;
        tree.delete(b"b");
        let r2 = tree.commit(true).hash;
        assert_ne!(r1, r2);
        assert_eq!(tree.get(b"b"), None);
    }

    #[test]
    fn test_reload_at_version() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let tree =
            VersionedTree::load(db.clone(), CommitId::empty(), TreeOptions::default()).unwrap();
        tree.set(b"a", b"1");
        let id1 = tree.commit(true);
        tree.set(b"a", b"2");
        let id2 = tree.commit(true);

        let reloaded = VersionedTree::load(db.clone(), id2, TreeOptions::default()).unwrap();
        assert_eq!(reloaded.get(b"a"), Some(b"2".to_vec()));
        assert_eq!(reloaded.last_commit_id(), id2);

        let old = VersionedTree::load(db, id1, TreeOptions::default()).unwrap();
        assert_eq!(old.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn test_load_rejects_wrong_hash() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let tree =
            VersionedTree::load(db.clone(), CommitId::empty(), TreeOptions::default()).unwrap();
        tree.set(b"a", b"1");
        let id = tree.commit(true);

        let forged = CommitId::new(id.version, Hash::from_bytes(b"forged"));
        assert!(matches!(
            VersionedTree::load(db, forged, TreeOptions::default()),
            Err(TreeError::RootMismatch { .. })
        ));
    }

    #[test]
    fn test_load_missing_version() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let missing = CommitId::new(9, Hash::from_bytes(b"x"));
        assert!(matches!(
            VersionedTree::load(db, missing, TreeOptions::default()),
            Err(TreeError::VersionDoesNotExist(9))
        ));
    }

    #[test]
    fn test_immutable_views_are_frozen() {
        let tree = fresh_tree();
        tree.set(b"k", b"v1");
        tree.commit(true);
        tree.set(b"k", b"v2");
        tree.commit(true);

        let v1 = tree.get_immutable(1).unwrap();
        let v2 = tree.get_immutable(2).unwrap();
        assert_eq!(v1.get(b"k"), Some(b"v1".to_vec()));
        assert_eq!(v2.get(b"k"), Some(b"v2".to_vec()));

        // the view survives further commits
        tree.set(b"k", b"v3");
        tree.commit(true);
        assert_eq!(v1.get(b"k"), Some(b"v1".to_vec()));

        assert!(matches!(
            tree.get_immutable(0),
            Err(TreeError::VersionDoesNotExist(0))
        ));
        assert!(matches!(
            tree.get_immutable(9),
            Err(TreeError::VersionDoesNotExist(9))
        ));
    }

    #[test]
    fn test_proof_verifies_against_version_root() {
        let tree = fresh_tree();
        for i in 0..7u8 {
            tree.set(&[i], &[i, i]);
        }
        let id = tree.commit(true);

        let view = tree.get_immutable(id.version).unwrap();
        let (value, proof) = view.get_with_proof(&[3]);
        assert_eq!(value, Some(vec![3, 3]));
        let proof = proof.unwrap();
        assert_eq!(proof.root_from(leaf_hash(&[3], &[3, 3])), id.hash);

        let (absent, no_proof) = view.get_with_proof(b"missing");
        assert_eq!(absent, None);
        assert!(no_proof.is_none());
    }

    #[test]
    fn test_delete_versions_folds_history() {
        let tree = fresh_tree();
        tree.set(b"a", b"1");
        tree.commit(true); // v1
        tree.set(b"b", b"2");
        tree.commit(true); // v2
        tree.set(b"a", b"3");
        tree.commit(true); // v3

        tree.delete_versions(&[1, 2]).unwrap();

        assert!(matches!(
            tree.get_immutable(1),
            Err(TreeError::VersionDoesNotExist(1))
        ));
        assert!(matches!(
            tree.get_immutable(2),
            Err(TreeError::VersionDoesNotExist(2))
        ));
        let v3 = tree.get_immutable(3).unwrap();
        assert_eq!(v3.get(b"a"), Some(b"3".to_vec()));
        assert_eq!(v3.get(b"b"), Some(b"2".to_vec()));

        // double delete reports the version as gone
        assert!(matches!(
            tree.delete_versions(&[1]),
            Err(TreeError::VersionDoesNotExist(1))
        ));
    }

    #[test]
    fn test_delete_versions_keeps_skipped_snapshot_height() {
        let tree = fresh_tree();
        for i in 1..=4u8 {
            tree.set(b"k", &[i]);
            tree.commit(true);
        }

        // prune 1 and 3, keep the "snapshot" height 2
        tree.delete_versions(&[1, 3]).unwrap();

        let v2 = tree.get_immutable(2).unwrap();
        assert_eq!(v2.get(b"k"), Some(vec![2]));
        let v4 = tree.get_immutable(4).unwrap();
        assert_eq!(v4.get(b"k"), Some(vec![4]));
    }

    #[test]
    fn test_delete_latest_is_rejected() {
        let tree = fresh_tree();
        tree.set(b"k", b"v");
        tree.commit(true);
        assert!(matches!(
            tree.delete_versions(&[1]),
            Err(TreeError::DeleteLatest(1))
        ));
    }

    #[test]
    fn test_load_version_for_overwriting() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let tree =
            VersionedTree::load(db.clone(), CommitId::empty(), TreeOptions::default()).unwrap();
        tree.set(b"k", b"v1");
        let id1 = tree.commit(true);
        tree.set(b"k", b"v2");
        tree.commit(true);
        tree.set(b"k", b"v3");
        tree.commit(true);

        assert_eq!(tree.load_version_for_overwriting(1).unwrap(), 1);
        assert_eq!(tree.version(), 1);
        assert_eq!(tree.get(b"k"), Some(b"v1".to_vec()));
        assert!(matches!(
            tree.get_immutable(2),
            Err(TreeError::VersionDoesNotExist(2))
        ));

        // history diverges cleanly
        tree.set(b"k", b"v2'");
        let id2 = tree.commit(true);
        assert_eq!(id2.version, 2);

        let reloaded = VersionedTree::load(db, id2, TreeOptions::default()).unwrap();
        assert_eq!(reloaded.get(b"k"), Some(b"v2'".to_vec()));
        assert_eq!(reloaded.last_commit_id(), id2);
        assert_eq!(
            reloaded.get_immutable(1).unwrap().root_hash(),
            id1.hash
        );
    }

    #[test]
    fn test_recommit_same_version() {
        let tree = fresh_tree();
        tree.set(b"a", b"1");
        let id1 = tree.commit(true);
        tree.set(b"b", b"2");
        let id2 = tree.commit(false);
        assert_eq!(id2.version, id1.version);
        assert_ne!(id2.hash, id1.hash);

        // replay from disk must see the folded changeset
        let v1 = tree.get_immutable(1).unwrap();
        assert_eq!(v1.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn test_scan_working_state() {
        let tree = fresh_tree();
        tree.set(b"a", b"1");
        tree.set(b"b", b"2");
        tree.set(b"c", b"3");
        tree.delete(b"b");

        let keys: Vec<Vec<u8>> = tree.scan(None, None).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec()]);
        let bounded: Vec<Vec<u8>> = tree.scan(Some(b"b"), None).map(|(k, _)| k).collect();
        assert_eq!(bounded, vec![b"c".to_vec()]);
    }
}
