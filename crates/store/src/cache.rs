//! Branches: ephemeral copy-on-write overlays over the committed state.
//!
//! A branch wraps every sub-store in a [`CacheKv`]: reads fall through to
//! the parent, writes buffer in a private write-set. Nothing reaches the
//! parent until [`CacheMultiStore::write`] merges the buffered operations;
//! dropping the branch discards them. A branch binds to one version — live
//! branches read the parent's working state, version branches read frozen
//! immutable views and refuse to merge.

use crate::key::StoreKey;
use crate::listen::WriteListener;
use crate::substore::SubStore;
use crate::trace::{TraceContext, Tracer, TRACE_OP_DELETE, TRACE_OP_READ, TRACE_OP_WRITE};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use trellis_kv::DbRef;
use trellis_tree::ImmutableTree;

/// What a branch store reads from and merges into.
pub(crate) enum BranchTarget {
    /// A live sub-store; merges apply to its working state.
    Live(SubStore),
    /// A frozen historical view; merging is a logic error.
    Frozen(Arc<ImmutableTree>),
    /// The root database itself (the branch's own metadata space).
    Db(DbRef),
    /// A parent branch store (nested branches).
    Nested(Arc<CacheKv>),
}

impl BranchTarget {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self {
            BranchTarget::Live(store) => store.get(key),
            BranchTarget::Frozen(view) => view.get(key),
            BranchTarget::Db(db) => db
                .get(key)
                .expect("STATE CRITICAL: branch parent read failed"),
            BranchTarget::Nested(parent) => parent.get_untraced(key),
        }
    }

    fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        match self {
            BranchTarget::Live(store) => store.scan(start, end),
            BranchTarget::Frozen(view) => view.scan(start, end),
            BranchTarget::Db(db) => db.scan(start, end),
            BranchTarget::Nested(parent) => parent.scan(start, end),
        }
    }

    fn apply(&self, key: &[u8], value: Option<&[u8]>) {
        match self {
            BranchTarget::Live(store) => match value {
                Some(value) => store.set(key, value),
                None => store.delete(key),
            },
            BranchTarget::Frozen(_) => {
                panic!("cannot write through a branch bound to a historical version")
            }
            BranchTarget::Db(db) => match value {
                Some(value) => db
                    .set(key, value)
                    .expect("STATE CRITICAL: branch merge write failed"),
                None => db
                    .delete(key)
                    .expect("STATE CRITICAL: branch merge delete failed"),
            },
            BranchTarget::Nested(parent) => match value {
                Some(value) => parent.set(key, value),
                None => parent.delete(key),
            },
        }
    }
}

/// One branched sub-store: a write-set overlay with read-through.
pub struct CacheKv {
    name: String,
    parent: BranchTarget,
    writes: Mutex<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
    tracer: Option<Arc<Tracer>>,
    trace_context: TraceContext,
    listeners: Vec<Arc<dyn WriteListener>>,
}

impl CacheKv {
    pub(crate) fn new(
        name: String,
        parent: BranchTarget,
        tracer: Option<Arc<Tracer>>,
        trace_context: TraceContext,
        listeners: Vec<Arc<dyn WriteListener>>,
    ) -> Self {
        Self {
            name,
            parent,
            writes: Mutex::new(BTreeMap::new()),
            tracer,
            trace_context,
            listeners,
        }
    }

    /// Point read: the write-set wins, then the parent.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(buffered) = self.writes.lock().unwrap().get(key) {
            return buffered.clone();
        }

        let value = self.parent.get(key);
        if let Some(tracer) = &self.tracer {
            tracer.trace(TRACE_OP_READ, key, value.as_deref(), &self.trace_context);
        }
        value
    }

    fn get_untraced(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(buffered) = self.writes.lock().unwrap().get(key) {
            return buffered.clone();
        }
        self.parent.get(key)
    }

    /// Whether the branch sees a value for `key`.
    pub fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Buffer a write. Invisible to the parent until [`CacheMultiStore::write`].
    pub fn set(&self, key: &[u8], value: &[u8]) {
        self.writes
            .lock()
            .unwrap()
            .insert(key.to_vec(), Some(value.to_vec()));
    }

    /// Buffer a delete. Invisible to the parent until [`CacheMultiStore::write`].
    pub fn delete(&self, key: &[u8]) {
        self.writes.lock().unwrap().insert(key.to_vec(), None);
    }

    /// Ascending scan over `[start, end)`, merging the write-set over the
    /// parent's view.
    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        let overlay: Vec<(Vec<u8>, Option<Vec<u8>>)> = {
            let writes = self.writes.lock().unwrap();
            writes
                .iter()
                .filter(|(k, _)| {
                    start.map_or(true, |s| k.as_slice() >= s)
                        && end.map_or(true, |e| k.as_slice() < e)
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        merge_scan(self.parent.scan(start, end), overlay)
    }

    /// Merge the write-set into the parent, applying operations in key
    /// order. Emits trace records and listener notifications per operation.
    pub(crate) fn write(&self) {
        let writes = std::mem::take(&mut *self.writes.lock().unwrap());
        for (key, value) in writes {
            self.parent.apply(&key, value.as_deref());

            if let Some(tracer) = &self.tracer {
                let op = if value.is_some() {
                    TRACE_OP_WRITE
                } else {
                    TRACE_OP_DELETE
                };
                tracer.trace(op, &key, value.as_deref(), &self.trace_context);
            }
            for listener in &self.listeners {
                listener.on_write(&self.name, &key, value.as_deref(), value.is_none());
            }
        }
    }
}

/// Merge a sorted parent iterator with a sorted overlay; overlay entries win
/// on ties and `None` entries drop the key.
fn merge_scan<'a>(
    parent: Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>,
    overlay: Vec<(Vec<u8>, Option<Vec<u8>>)>,
) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
    let mut parent = parent.peekable();
    let mut overlay = overlay.into_iter().peekable();

    Box::new(std::iter::from_fn(move || loop {
        match (parent.peek(), overlay.peek()) {
            (Some((pk, _)), Some((ok, _))) => {
                if pk < ok {
                    return parent.next();
                }
                if pk == ok {
                    parent.next();
                }
                let (key, value) = overlay.next().expect("peeked");
                if let Some(value) = value {
                    return Some((key, value));
                }
                // deleted in the overlay: skip
            }
            (Some(_), None) => return parent.next(),
            (None, Some(_)) => {
                let (key, value) = overlay.next().expect("peeked");
                if let Some(value) = value {
                    return Some((key, value));
                }
            }
            (None, None) => return None,
        }
    }))
}

/// An ephemeral branch of the whole multi-store.
///
/// Holds one [`CacheKv`] per sub-store plus one for the root database.
/// Writes merge into the parents only on [`write`](Self::write); dropping
/// the branch discards them.
pub struct CacheMultiStore {
    db: Arc<CacheKv>,
    stores: HashMap<StoreKey, Arc<CacheKv>>,
    keys_by_name: HashMap<String, StoreKey>,
    tracer: Option<Arc<Tracer>>,
    trace_context: TraceContext,
}

impl CacheMultiStore {
    pub(crate) fn new(
        db: DbRef,
        targets: Vec<(StoreKey, BranchTarget)>,
        keys_by_name: HashMap<String, StoreKey>,
        tracer: Option<Arc<Tracer>>,
        trace_context: TraceContext,
        listeners: &HashMap<String, Vec<Arc<dyn WriteListener>>>,
    ) -> Self {
        let mut stores = HashMap::with_capacity(targets.len());
        for (key, target) in targets {
            let store_listeners = listeners.get(key.name()).cloned().unwrap_or_default();
            let cache = CacheKv::new(
                key.name().to_string(),
                target,
                tracer.clone(),
                trace_context.clone(),
                store_listeners,
            );
            stores.insert(key, Arc::new(cache));
        }

        Self {
            db: Arc::new(CacheKv::new(
                String::new(),
                BranchTarget::Db(db),
                None,
                TraceContext::new(),
                Vec::new(),
            )),
            stores,
            keys_by_name,
            tracer,
            trace_context,
        }
    }

    /// The branched sub-store for `key`.
    ///
    /// # Panics
    ///
    /// Panics if the key was never mounted (a configuration bug).
    pub fn kv_store(&self, key: &StoreKey) -> Arc<CacheKv> {
        self.stores
            .get(key)
            .unwrap_or_else(|| panic!("store does not exist for key: {}", key.name()))
            .clone()
    }

    /// The branched sub-store under `name`, if mounted.
    pub fn kv_store_by_name(&self, name: &str) -> Option<Arc<CacheKv>> {
        self.keys_by_name.get(name).map(|key| self.kv_store(key))
    }

    /// Merge all buffered writes into the parents.
    ///
    /// The root-database branch merges first, then the sub-stores in name
    /// order. Merging is atomic from the parent's perspective only under
    /// the single-writer discipline; concurrent branch merges are the
    /// caller's responsibility.
    pub fn write(&self) {
        self.db.write();

        let mut ordered: Vec<(&StoreKey, &Arc<CacheKv>)> = self.stores.iter().collect();
        ordered.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        for (_, store) in ordered {
            store.write();
        }
    }

    /// Branch this branch. The nested branch merges into this one, not into
    /// the committed state.
    pub fn branch(&self) -> CacheMultiStore {
        let targets: Vec<(StoreKey, BranchTarget)> = self
            .stores
            .iter()
            .map(|(key, store)| (key.clone(), BranchTarget::Nested(store.clone())))
            .collect();

        let mut nested_stores = HashMap::with_capacity(targets.len());
        for (key, target) in targets {
            let cache = CacheKv::new(
                key.name().to_string(),
                target,
                self.tracer.clone(),
                self.trace_context.clone(),
                Vec::new(),
            );
            nested_stores.insert(key, Arc::new(cache));
        }

        CacheMultiStore {
            db: Arc::new(CacheKv::new(
                String::new(),
                BranchTarget::Nested(self.db.clone()),
                None,
                TraceContext::new(),
                Vec::new(),
            )),
            stores: nested_stores,
            keys_by_name: self.keys_by_name.clone(),
            tracer: self.tracer.clone(),
            trace_context: self.trace_context.clone(),
        }
    }

    /// Keys of all branched stores.
    pub fn store_keys(&self) -> Vec<StoreKey> {
        let mut keys: Vec<StoreKey> = self.stores.keys().cloned().collect();
        keys.sort_by(|a, b| a.name().cmp(b.name()));
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substore::TransientStore;
    use trellis_kv::MemoryDb;

    fn live_branch_over(store: SubStore) -> CacheKv {
        CacheKv::new(
            "test".into(),
            BranchTarget::Live(store),
            None,
            TraceContext::new(),
            Vec::new(),
        )
    }

    fn transient_substore() -> SubStore {
        SubStore::Transient(TransientStore::new())
    }

    #[test]
    fn test_writes_invisible_until_merge() {
        let parent = transient_substore();
        parent.set(b"k", b"old");

        let branch = live_branch_over(parent.clone());
        branch.set(b"k", b"new");
        branch.set(b"k2", b"v2");

        assert_eq!(parent.get(b"k"), Some(b"old".to_vec()));
        assert_eq!(parent.get(b"k2"), None);
        assert_eq!(branch.get(b"k"), Some(b"new".to_vec()));
        assert_eq!(branch.get(b"k2"), Some(b"v2".to_vec()));

        branch.write();
        assert_eq!(parent.get(b"k"), Some(b"new".to_vec()));
        assert_eq!(parent.get(b"k2"), Some(b"v2".to_vec()));
    }

    #[test]
    fn test_buffered_delete_shadows_parent() {
        let parent = transient_substore();
        parent.set(b"k", b"v");

        let branch = live_branch_over(parent.clone());
        branch.delete(b"k");
        assert_eq!(branch.get(b"k"), None);
        assert_eq!(parent.get(b"k"), Some(b"v".to_vec()));

        branch.write();
        assert_eq!(parent.get(b"k"), None);
    }

    #[test]
    fn test_dropping_branch_discards_writes() {
        let parent = transient_substore();
        {
            let branch = live_branch_over(parent.clone());
            branch.set(b"k", b"v");
        }
        assert_eq!(parent.get(b"k"), None);
    }

    #[test]
    fn test_merge_scan_overlay_wins() {
        let parent = transient_substore();
        parent.set(b"a", b"pa");
        parent.set(b"b", b"pb");
        parent.set(b"d", b"pd");

        let branch = live_branch_over(parent);
        branch.set(b"b", b"ob");
        branch.set(b"c", b"oc");
        branch.delete(b"d");

        let merged: Vec<(Vec<u8>, Vec<u8>)> = branch.scan(None, None).collect();
        assert_eq!(
            merged,
            vec![
                (b"a".to_vec(), b"pa".to_vec()),
                (b"b".to_vec(), b"ob".to_vec()),
                (b"c".to_vec(), b"oc".to_vec()),
            ]
        );

        let bounded: Vec<(Vec<u8>, Vec<u8>)> = branch.scan(Some(b"b"), Some(b"c")).collect();
        assert_eq!(bounded, vec![(b"b".to_vec(), b"ob".to_vec())]);
    }

    #[test]
    fn test_nested_branch_merges_into_parent_branch() {
        let root = transient_substore();
        let key = StoreKey::transient("test");
        let mut keys_by_name = HashMap::new();
        keys_by_name.insert("test".to_string(), key.clone());

        let branch = CacheMultiStore::new(
            Arc::new(MemoryDb::new()),
            vec![(key.clone(), BranchTarget::Live(root.clone()))],
            keys_by_name,
            None,
            TraceContext::new(),
            &HashMap::new(),
        );

        let nested = branch.branch();
        nested.kv_store(&key).set(b"k", b"v");
        assert_eq!(branch.kv_store(&key).get(b"k"), None);

        nested.write();
        assert_eq!(branch.kv_store(&key).get(b"k"), Some(b"v".to_vec()));
        assert_eq!(root.get(b"k"), None);

        branch.write();
        assert_eq!(root.get(b"k"), Some(b"v".to_vec()));
    }

    #[test]
    #[should_panic(expected = "historical version")]
    fn test_frozen_branch_refuses_merge() {
        use trellis_tree::{TreeOptions, VersionedTree};
        use trellis_types::CommitId;

        let db: DbRef = Arc::new(MemoryDb::new());
        let tree = VersionedTree::load(db, CommitId::empty(), TreeOptions::default()).unwrap();
        tree.set(b"k", b"v");
        tree.commit(true);
        let view = Arc::new(tree.get_immutable(1).unwrap());

        let branch = CacheKv::new(
            "frozen".into(),
            BranchTarget::Frozen(view),
            None,
            TraceContext::new(),
            Vec::new(),
        );
        branch.set(b"k", b"new");
        branch.write();
    }
}
