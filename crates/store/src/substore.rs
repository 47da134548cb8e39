//! Mounted sub-stores: the closed type variant and its capabilities.
//!
//! Dispatch is by variant tag. Operations a type cannot perform surface as
//! structured errors (or error responses) at the call site; only true
//! configuration bugs panic.

use crate::block_cache::StoreCache;
use crate::key::StoreType;
use crate::listen::WriteListener;
use crate::query::{QueryError, QueryRequest, QueryResponse, ProofOp, ProofOps, PROOF_OP_TREE};
use crate::trace::{TraceContext, Tracer, TRACE_OP_DELETE, TRACE_OP_READ, TRACE_OP_WRITE};
use crate::wire;
use std::sync::Arc;
use trellis_kv::{next_prefix, Database, DbRef, MemoryDb};
use trellis_tree::VersionedTree;
use trellis_types::{CommitId, Hash};

/// A mounted sub-store.
///
/// Clones share the underlying store; the variants carry `Arc`s.
#[derive(Clone)]
pub enum SubStore {
    /// Versioned Merkle sub-store.
    Versioned(VersionedStore),
    /// Raw key-value adapter over a prefixed database.
    Database(DbStore),
    /// In-memory store cleared on each commit.
    Transient(TransientStore),
    /// Persistent in-process memory store.
    Memory(MemStore),
}

impl SubStore {
    /// The variant tag.
    pub fn store_type(&self) -> StoreType {
        match self {
            SubStore::Versioned(_) => StoreType::Versioned,
            SubStore::Database(_) => StoreType::Database,
            SubStore::Transient(_) => StoreType::Transient,
            SubStore::Memory(_) => StoreType::Memory,
        }
    }

    /// Commit the store, returning its commit id.
    ///
    /// Transient stores clear their contents; database and memory stores
    /// return the empty commit id.
    pub fn commit(&self, bump_version: bool) -> CommitId {
        match self {
            SubStore::Versioned(s) => s.tree.commit(bump_version),
            SubStore::Database(_) => CommitId::empty(),
            SubStore::Transient(s) => {
                s.db.clear();
                CommitId::empty()
            }
            SubStore::Memory(_) => CommitId::empty(),
        }
    }

    /// The store's last commit id (empty for non-versioned stores).
    pub fn last_commit_id(&self) -> CommitId {
        match self {
            SubStore::Versioned(s) => s.tree.last_commit_id(),
            _ => CommitId::empty(),
        }
    }

    /// The root hash the next commit would produce (zero for non-versioned
    /// stores).
    pub fn working_hash(&self) -> Hash {
        match self {
            SubStore::Versioned(s) => s.tree.working_hash(),
            _ => Hash::ZERO,
        }
    }

    /// Point read.
    ///
    /// # Panics
    ///
    /// Panics on backend read failure (storage corruption).
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self {
            SubStore::Versioned(s) => s.get(key),
            SubStore::Database(s) => s
                .db
                .get(key)
                .expect("STATE CRITICAL: sub-store read failed"),
            SubStore::Transient(s) => s
                .db
                .get(key)
                .expect("STATE CRITICAL: sub-store read failed"),
            SubStore::Memory(s) => s
                .db
                .get(key)
                .expect("STATE CRITICAL: sub-store read failed"),
        }
    }

    /// Whether the store contains `key`.
    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Point write.
    pub fn set(&self, key: &[u8], value: &[u8]) {
        match self {
            SubStore::Versioned(s) => s.set(key, value),
            SubStore::Database(s) => s
                .db
                .set(key, value)
                .expect("STATE CRITICAL: sub-store write failed"),
            SubStore::Transient(s) => s
                .db
                .set(key, value)
                .expect("STATE CRITICAL: sub-store write failed"),
            SubStore::Memory(s) => s
                .db
                .set(key, value)
                .expect("STATE CRITICAL: sub-store write failed"),
        }
    }

    /// Point delete.
    pub fn delete(&self, key: &[u8]) {
        match self {
            SubStore::Versioned(s) => s.delete(key),
            SubStore::Database(s) => s
                .db
                .delete(key)
                .expect("STATE CRITICAL: sub-store delete failed"),
            SubStore::Transient(s) => s
                .db
                .delete(key)
                .expect("STATE CRITICAL: sub-store delete failed"),
            SubStore::Memory(s) => s
                .db
                .delete(key)
                .expect("STATE CRITICAL: sub-store delete failed"),
        }
    }

    /// Ascending scan over `[start, end)`.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        match self {
            SubStore::Versioned(s) => s.tree.scan(start, end),
            SubStore::Database(s) => s.db.scan(start, end),
            SubStore::Transient(s) => s.db.scan(start, end),
            SubStore::Memory(s) => s.db.scan(start, end),
        }
    }

    /// The versioned wrapper, when this is a versioned store.
    pub fn as_versioned(&self) -> Option<&VersionedStore> {
        match self {
            SubStore::Versioned(s) => Some(s),
            _ => None,
        }
    }
}

/// A versioned Merkle sub-store, optionally wrapped by the inter-block
/// cache.
///
/// The wrapper is transparent to reads and writes. Operations that need the
/// raw tree (pruning, export/import, immutable views, rollback,
/// set-initial-version) unwrap through [`VersionedStore::tree`].
#[derive(Clone)]
pub struct VersionedStore {
    tree: Arc<VersionedTree>,
    cache: Option<Arc<StoreCache>>,
}

impl VersionedStore {
    pub(crate) fn new(tree: Arc<VersionedTree>, cache: Option<Arc<StoreCache>>) -> Self {
        Self { tree, cache }
    }

    /// The underlying committing tree — the unwrap capability.
    pub fn tree(&self) -> &Arc<VersionedTree> {
        &self.tree
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(key) {
                return Some(hit);
            }
            let value = self.tree.get(key);
            if let Some(v) = &value {
                cache.insert(key, v);
            }
            return value;
        }
        self.tree.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        self.tree.set(key, value);
        if let Some(cache) = &self.cache {
            cache.insert(key, value);
        }
    }

    fn delete(&self, key: &[u8]) {
        self.tree.delete(key);
        if let Some(cache) = &self.cache {
            cache.remove(key);
        }
    }

    /// Serve a sub-store query at the rewritten subpath.
    ///
    /// `/key` is a provable point read of `data`; `/subspace` is a prefix
    /// scan of `data` returning encoded pairs.
    pub fn query(&self, req: &QueryRequest) -> QueryResponse {
        let height = if req.height == 0 {
            self.tree.version()
        } else {
            req.height
        };

        let view = match self.tree.get_immutable(height) {
            Ok(view) => view,
            Err(e) => {
                return QueryError::InvalidRequest(format!(
                    "failed to load version {height}: {e}"
                ))
                .into_response()
            }
        };

        match req.path.as_str() {
            "/key" => {
                let mut res = QueryResponse {
                    height,
                    key: req.data.clone(),
                    ..QueryResponse::default()
                };

                if req.prove {
                    let (value, proof) = view.get_with_proof(&req.data);
                    res.value = value.unwrap_or_default();
                    res.proof_ops = proof.map(|proof| ProofOps {
                        ops: vec![ProofOp {
                            op_type: PROOF_OP_TREE.to_string(),
                            key: req.data.clone(),
                            data: wire::encode_merkle_proof(&proof),
                        }],
                    });
                } else {
                    res.value = view.get(&req.data).unwrap_or_default();
                }

                res
            }

            "/subspace" => {
                let prefix = &req.data;
                let (start, end) = if prefix.is_empty() {
                    (None, None)
                } else {
                    (Some(prefix.as_slice()), next_prefix(prefix))
                };
                let pairs = view.scan(start, end.as_deref());

                QueryResponse {
                    height,
                    key: req.data.clone(),
                    value: wire::encode_pairs(pairs),
                    ..QueryResponse::default()
                }
            }

            other => QueryError::UnknownRequest(format!("unexpected query path: {other}"))
                .into_response(),
        }
    }
}

/// Raw key-value adapter over a (prefixed) database.
///
/// Merkle operations and proofs are unsupported; commits are no-ops. Used
/// for dedicated-DB mounts and archival read-only views.
#[derive(Clone)]
pub struct DbStore {
    db: DbRef,
}

impl DbStore {
    pub(crate) fn new(db: DbRef) -> Self {
        Self { db }
    }
}

/// In-memory store cleared on every commit.
#[derive(Clone)]
pub struct TransientStore {
    db: Arc<MemoryDb>,
}

impl TransientStore {
    pub(crate) fn new() -> Self {
        Self {
            db: Arc::new(MemoryDb::new()),
        }
    }
}

/// Persistent in-process memory store; contents survive commits but are
/// never persisted, aggregated, or snapshotted.
#[derive(Clone)]
pub struct MemStore {
    db: Arc<MemoryDb>,
}

impl MemStore {
    pub(crate) fn new() -> Self {
        Self {
            db: Arc::new(MemoryDb::new()),
        }
    }
}

/// A sub-store handle with tracing and listening applied.
///
/// This is what callers get from `MultiStore::kv_store`: reads and writes
/// pass straight through to the sub-store, additionally emitting trace
/// records and listener notifications when configured.
pub struct KvView {
    name: String,
    store: SubStore,
    tracer: Option<Arc<Tracer>>,
    trace_context: TraceContext,
    listeners: Vec<Arc<dyn WriteListener>>,
}

impl KvView {
    pub(crate) fn new(
        name: String,
        store: SubStore,
        tracer: Option<Arc<Tracer>>,
        trace_context: TraceContext,
        listeners: Vec<Arc<dyn WriteListener>>,
    ) -> Self {
        Self {
            name,
            store,
            tracer,
            trace_context,
            listeners,
        }
    }

    /// The store name this view addresses.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped sub-store.
    pub fn store(&self) -> &SubStore {
        &self.store
    }

    /// Point read.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let value = self.store.get(key);
        if let Some(tracer) = &self.tracer {
            tracer.trace(TRACE_OP_READ, key, value.as_deref(), &self.trace_context);
        }
        value
    }

    /// Whether the store contains `key`.
    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Point write.
    pub fn set(&self, key: &[u8], value: &[u8]) {
        self.store.set(key, value);
        if let Some(tracer) = &self.tracer {
            tracer.trace(TRACE_OP_WRITE, key, Some(value), &self.trace_context);
        }
        for listener in &self.listeners {
            listener.on_write(&self.name, key, Some(value), false);
        }
    }

    /// Point delete.
    pub fn delete(&self, key: &[u8]) {
        self.store.delete(key);
        if let Some(tracer) = &self.tracer {
            tracer.trace(TRACE_OP_DELETE, key, None, &self.trace_context);
        }
        for listener in &self.listeners {
            listener.on_write(&self.name, key, None, true);
        }
    }

    /// Ascending scan over `[start, end)`.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        self.store.scan(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::decode_merkle_proof;
    use trellis_tree::TreeOptions;

    fn versioned_store() -> VersionedStore {
        let db: DbRef = Arc::new(MemoryDb::new());
        let tree = VersionedTree::load(db, CommitId::empty(), TreeOptions::default()).unwrap();
        VersionedStore::new(Arc::new(tree), None)
    }

    #[test]
    fn test_transient_clears_on_commit() {
        let store = SubStore::Transient(TransientStore::new());
        store.set(b"k", b"v");
        assert_eq!(store.get(b"k"), Some(b"v".to_vec()));

        let id = store.commit(true);
        assert!(id.is_empty());
        assert_eq!(store.get(b"k"), None);
    }

    #[test]
    fn test_memory_survives_commit() {
        let store = SubStore::Memory(MemStore::new());
        store.set(b"k", b"v");
        let id = store.commit(true);
        assert!(id.is_empty());
        assert_eq!(store.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_db_store_commit_is_noop() {
        let store = SubStore::Database(DbStore::new(Arc::new(MemoryDb::new())));
        store.set(b"k", b"v");
        assert!(store.commit(true).is_empty());
        assert_eq!(store.get(b"k"), Some(b"v".to_vec()));
        assert!(store.last_commit_id().is_empty());
    }

    #[test]
    fn test_versioned_query_key_with_proof() {
        let vs = versioned_store();
        let store = SubStore::Versioned(vs.clone());
        store.set(b"k", b"v");
        let id = vs.tree().commit(true);

        let res = vs.query(&QueryRequest {
            path: "/key".into(),
            data: b"k".to_vec(),
            height: 0,
            prove: true,
        });
        assert!(res.is_ok());
        assert_eq!(res.height, id.version);
        assert_eq!(res.value, b"v".to_vec());

        let ops = res.proof_ops.unwrap();
        assert_eq!(ops.ops.len(), 1);
        assert_eq!(ops.ops[0].op_type, PROOF_OP_TREE);
        let proof = decode_merkle_proof(&ops.ops[0].data).unwrap();
        let leaf = Hash::from_parts(&[b"k", b"v"]);
        assert_eq!(proof.root_from(leaf), id.hash);
    }

    #[test]
    fn test_versioned_query_subspace() {
        let vs = versioned_store();
        vs.tree().set(b"p/1", b"a");
        vs.tree().set(b"p/2", b"b");
        vs.tree().set(b"q/1", b"c");
        vs.tree().commit(true);

        let res = vs.query(&QueryRequest {
            path: "/subspace".into(),
            data: b"p/".to_vec(),
            height: 0,
            prove: false,
        });
        assert!(res.is_ok());
        let pairs = crate::wire::decode_pairs(&res.value).unwrap();
        assert_eq!(
            pairs,
            vec![
                (b"p/1".to_vec(), b"a".to_vec()),
                (b"p/2".to_vec(), b"b".to_vec()),
            ]
        );
    }

    #[test]
    fn test_versioned_query_unknown_path_and_pruned_height() {
        let vs = versioned_store();
        vs.tree().set(b"k", b"v");
        vs.tree().commit(true);

        let res = vs.query(&QueryRequest {
            path: "/nope".into(),
            data: vec![],
            height: 0,
            prove: false,
        });
        assert_eq!(res.code, crate::query::codes::UNKNOWN_REQUEST);

        let res = vs.query(&QueryRequest {
            path: "/key".into(),
            data: b"k".to_vec(),
            height: 99,
            prove: false,
        });
        assert_eq!(res.code, crate::query::codes::INVALID_REQUEST);
    }

    #[test]
    fn test_block_cache_transparent_and_coherent() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let tree = Arc::new(
            VersionedTree::load(db, CommitId::empty(), TreeOptions::default()).unwrap(),
        );
        let cache = Arc::new(crate::block_cache::BlockCacheManager::new(64)).cache_for("s");
        let cached = VersionedStore::new(tree.clone(), Some(cache));

        cached.set(b"k", b"v1");
        assert_eq!(cached.get(b"k"), Some(b"v1".to_vec()));
        cached.set(b"k", b"v2");
        assert_eq!(cached.get(b"k"), Some(b"v2".to_vec()));
        cached.delete(b"k");
        assert_eq!(cached.get(b"k"), None);

        // the raw tree is reachable for low-level operations
        cached.tree().set(b"direct", b"x");
        assert_eq!(tree.get(b"direct"), Some(b"x".to_vec()));
    }
}
