//! The multi-store: commit orchestration over a dynamic set of sub-stores.
//!
//! One [`MultiStore`] groups many independently committed sub-stores into a
//! single logical database with a shared version number and a
//! Merkle-aggregated root hash. The intended scheduling model is a single
//! commit driver with concurrent readers: queries, branches, and snapshot
//! export run against published state while the driver mounts, loads,
//! commits, prunes, and rolls back.

use crate::block_cache::BlockCacheManager;
use crate::cache::{BranchTarget, CacheMultiStore};
use crate::codec;
use crate::config::PruningOptions;
use crate::error::StoreError;
use crate::key::{StoreKey, StoreKind, StoreType};
use crate::listen::WriteListener;
use crate::query::{
    parse_path, require_proof, ProofOp, ProofOps, QueryError, QueryRequest, QueryResponse,
    PROOFS_PATH, PROOF_OP_MULTISTORE,
};
use crate::substore::{DbStore, KvView, MemStore, SubStore, TransientStore, VersionedStore};
use crate::trace::{TraceContext, Tracer};
use crate::upgrades::StoreUpgrades;
use crate::wire;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use trellis_kv::{Batch, DbRef, PrefixDb};
use trellis_metrics as metrics;
use trellis_tree::{TreeOptions, VersionedTree};
use trellis_types::{CommitId, CommitInfo, Hash, StoreInfo};

#[derive(Clone)]
struct StoreParams {
    key: StoreKey,
    typ: StoreType,
    db: Option<DbRef>,
    /// Applied to the first commit when the store is added by an upgrade.
    initial_version: i64,
}

/// A versioned, committing multi-store.
///
/// Mount sub-stores with [`mount_store_with_db`](Self::mount_store_with_db),
/// then call [`load_latest_version`](Self::load_latest_version) (or
/// [`load_version`](Self::load_version)) before anything else. All methods
/// take `&self`; mutations other than the commit-driver operations are
/// protected by the single-writer discipline described in the module docs.
pub struct MultiStore {
    db: DbRef,
    archival_db: Option<DbRef>,
    archival_version: i64,

    last_commit_info: RwLock<Option<CommitInfo>>,
    pruning: Mutex<PruningOptions>,
    tree_options: Mutex<TreeOptions>,
    prune_heights: Mutex<Vec<i64>>,
    initial_version: AtomicI64,
    earliest_version: AtomicI64,

    stores_params: RwLock<HashMap<StoreKey, StoreParams>>,
    stores: RwLock<HashMap<StoreKey, SubStore>>,
    keys_by_name: RwLock<HashMap<String, StoreKey>>,

    tracer: Mutex<Option<Arc<Tracer>>>,
    trace_context: Mutex<TraceContext>,
    listeners: RwLock<HashMap<String, Vec<Arc<dyn WriteListener>>>>,

    block_cache: Mutex<Option<Arc<BlockCacheManager>>>,
}

impl MultiStore {
    /// Create a multi-store over the shared database.
    ///
    /// The store starts with the keep-everything pruning policy. Mount
    /// sub-stores, then load a version.
    pub fn new(db: DbRef) -> Self {
        Self {
            db,
            archival_db: None,
            archival_version: 0,
            last_commit_info: RwLock::new(None),
            pruning: Mutex::new(PruningOptions::nothing()),
            tree_options: Mutex::new(TreeOptions::default()),
            prune_heights: Mutex::new(Vec::new()),
            initial_version: AtomicI64::new(0),
            earliest_version: AtomicI64::new(0),
            stores_params: RwLock::new(HashMap::new()),
            stores: RwLock::new(HashMap::new()),
            keys_by_name: RwLock::new(HashMap::new()),
            tracer: Mutex::new(None),
            trace_context: Mutex::new(TraceContext::new()),
            listeners: RwLock::new(HashMap::new()),
            block_cache: Mutex::new(None),
        }
    }

    /// Create a multi-store with an archival database holding frozen
    /// historical state. Versions strictly below `archival_version` load as
    /// raw read-only views from the archival database.
    pub fn new_with_archival(db: DbRef, archival_db: DbRef, archival_version: i64) -> Self {
        let mut store = Self::new(db);
        store.archival_db = Some(archival_db);
        store.archival_version = archival_version;
        store
    }

    fn should_use_archival(&self, version: i64) -> bool {
        self.archival_db.is_some() && self.archival_version > version
    }

    // ── Configuration ────────────────────────────────────────────────

    /// The current pruning policy.
    pub fn get_pruning(&self) -> PruningOptions {
        *self.pruning.lock().unwrap()
    }

    /// Set the pruning policy. Takes effect at the next commit.
    pub fn set_pruning(&self, opts: PruningOptions) {
        *self.pruning.lock().unwrap() = opts;
    }

    /// Set the tree options applied to versioned sub-stores on the next
    /// load.
    pub fn set_tree_options(&self, opts: TreeOptions) {
        *self.tree_options.lock().unwrap() = opts;
    }

    /// Register the process-wide inter-block cache. Versioned sub-stores
    /// are wrapped with their per-name cache on the next load.
    pub fn set_inter_block_cache(&self, cache: Arc<BlockCacheManager>) {
        *self.block_cache.lock().unwrap() = Some(cache);
    }

    /// Set the version the first commit of an empty store will use, and
    /// propagate it to every mounted versioned sub-store.
    pub fn set_initial_version(&self, version: i64) {
        self.initial_version.store(version, Ordering::Relaxed);

        let stores = self.stores.read().unwrap();
        for store in stores.values() {
            if let Some(vs) = store.as_versioned() {
                vs.tree().set_initial_version(version);
            }
        }
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Mount a sub-store under `key`, optionally over a dedicated database.
    ///
    /// # Panics
    ///
    /// Panics when the key identity or its name is already mounted: a
    /// duplicate mount is an unrecoverable configuration error.
    pub fn mount_store_with_db(&self, key: StoreKey, typ: StoreType, db: Option<DbRef>) {
        let mut params = self.stores_params.write().unwrap();
        let mut names = self.keys_by_name.write().unwrap();

        if params.contains_key(&key) {
            panic!("duplicate store key {key:?}");
        }
        if names.contains_key(key.name()) {
            panic!("duplicate store key name {key:?}");
        }

        params.insert(
            key.clone(),
            StoreParams {
                key: key.clone(),
                typ,
                db,
                initial_version: 0,
            },
        );
        names.insert(key.name().to_string(), key);
    }

    /// Keys of every mounted store.
    pub fn store_keys(&self) -> Vec<StoreKey> {
        let names = self.keys_by_name.read().unwrap();
        let mut keys = Vec::with_capacity(names.len());
        for key in names.values() {
            keys.push(key.clone());
        }
        keys
    }

    // ── Version loading ──────────────────────────────────────────────

    /// Load the latest committed version.
    pub fn load_latest_version(&self) -> Result<(), StoreError> {
        let version = codec::get_latest_version(&*self.db);
        self.load_version_with(version, None)
    }

    /// Load the latest committed version, applying schema upgrades.
    pub fn load_latest_version_and_upgrade(
        &self,
        upgrades: &StoreUpgrades,
    ) -> Result<(), StoreError> {
        let version = codec::get_latest_version(&*self.db);
        self.load_version_with(version, Some(upgrades))
    }

    /// Load a specific committed version (0 loads the empty state).
    pub fn load_version(&self, version: i64) -> Result<(), StoreError> {
        self.load_version_with(version, None)
    }

    /// Load a specific committed version, applying schema upgrades.
    pub fn load_version_and_upgrade(
        &self,
        version: i64,
        upgrades: &StoreUpgrades,
    ) -> Result<(), StoreError> {
        self.load_version_with(version, Some(upgrades))
    }

    fn load_version_with(
        &self,
        version: i64,
        upgrades: Option<&StoreUpgrades>,
    ) -> Result<(), StoreError> {
        let commit_info = if version != 0 {
            Some(codec::get_commit_info(&*self.db, version)?)
        } else {
            None
        };

        let infos: HashMap<String, CommitId> = commit_info
            .as_ref()
            .map(|ci| {
                ci.store_infos()
                    .iter()
                    .map(|si| (si.name.clone(), si.commit_id))
                    .collect()
            })
            .unwrap_or_default();

        let mut params_list: Vec<StoreParams> =
            self.stores_params.read().unwrap().values().cloned().collect();
        if upgrades.is_some() {
            // Deterministic iteration order: upgrades mutate store contents,
            // so execution order must match across nodes.
            params_list.sort_by(|a, b| a.key.name().cmp(b.key.name()));
        }

        let mut new_stores = HashMap::with_capacity(params_list.len());
        for mut params in params_list {
            let key = params.key.clone();
            let commit_id = infos.get(key.name()).copied().unwrap_or_default();

            // A store added by the upgrade starts its history at the
            // multi-store's next version.
            if upgrades.is_some_and(|u| u.is_added(key.name())) {
                params.initial_version = version + 1;
            }

            let store = self.load_commit_store_from_params(&key, commit_id, &params)?;

            if upgrades.is_some_and(|u| u.is_deleted(key.name())) {
                delete_kv_store(&store);
            } else if let Some(old_name) = upgrades.and_then(|u| u.renamed_from(key.name())) {
                // Renames load the old store under an unregistered key,
                // copy everything across, then clear the old contents.
                let old_key = StoreKey::kv(old_name);
                let old_id = infos.get(old_name).copied().unwrap_or_default();
                let mut old_params = params.clone();
                old_params.key = old_key.clone();
                let old_store =
                    self.load_commit_store_from_params(&old_key, old_id, &old_params)?;
                move_kv_store_data(&old_store, &store);
            }

            new_stores.insert(key, store);
        }

        self.set_last_commit_info(Some(
            commit_info.unwrap_or_else(|| CommitInfo::new(version, Vec::new())),
        ));
        *self.stores.write().unwrap() = new_stores;

        // Pick up any pruning heights that were scheduled but not yet
        // executed before the last shutdown. Absence is non-fatal.
        if let Ok(heights) = codec::get_pruning_heights(&*self.db) {
            if !heights.is_empty() {
                *self.prune_heights.lock().unwrap() = heights;
            }
        }

        tracing::debug!(version, stores = self.keys_by_name.read().unwrap().len(), "loaded version");
        Ok(())
    }

    fn load_commit_store_from_params(
        &self,
        key: &StoreKey,
        id: CommitId,
        params: &StoreParams,
    ) -> Result<SubStore, StoreError> {
        let (db, effective_type): (DbRef, StoreType) = if let Some(dedicated) = &params.db {
            (
                Arc::new(PrefixDb::new(
                    dedicated.clone(),
                    codec::DEDICATED_DB_PREFIX.to_vec(),
                )),
                params.typ,
            )
        } else if self.should_use_archival(id.version) {
            // Frozen historical state: a raw read-only view keyed by version
            // in the archival database. No Merkle tree, no proofs.
            let archival = self.archival_db.clone().expect("archival db is configured");
            (
                Arc::new(PrefixDb::new(
                    archival,
                    codec::archival_store_prefix(id.version, key.name()),
                )),
                StoreType::Database,
            )
        } else {
            (
                Arc::new(PrefixDb::new(
                    self.db.clone(),
                    codec::store_prefix(key.name()),
                )),
                params.typ,
            )
        };

        match effective_type {
            StoreType::Multi => panic!("recursive multi-stores are not supported"),

            StoreType::Versioned => {
                let opts = *self.tree_options.lock().unwrap();
                let tree = if params.initial_version == 0 {
                    VersionedTree::load(db, id, opts)
                } else {
                    VersionedTree::load_with_initial_version(
                        db,
                        id,
                        params.initial_version,
                        opts,
                    )
                }
                .map_err(|source| StoreError::StoreLoad {
                    name: key.name().to_string(),
                    source,
                })?;

                let cache = self
                    .block_cache
                    .lock()
                    .unwrap()
                    .as_ref()
                    .map(|mgr| mgr.cache_for(key.name()));
                Ok(SubStore::Versioned(VersionedStore::new(
                    Arc::new(tree),
                    cache,
                )))
            }

            StoreType::Database => Ok(SubStore::Database(DbStore::new(db))),

            StoreType::Transient => {
                if key.kind() != StoreKind::Transient {
                    return Err(StoreError::InvalidKeyKind {
                        name: key.name().to_string(),
                        expected: "transient",
                    });
                }
                Ok(SubStore::Transient(TransientStore::new()))
            }

            StoreType::Memory => {
                if key.kind() != StoreKind::Memory {
                    return Err(StoreError::InvalidKeyKind {
                        name: key.name().to_string(),
                        expected: "memory",
                    });
                }
                Ok(SubStore::Memory(MemStore::new()))
            }
        }
    }

    // ── Commit state ─────────────────────────────────────────────────

    /// The commit info published by the last load or commit.
    pub fn last_commit_info(&self) -> Option<CommitInfo> {
        self.last_commit_info.read().unwrap().clone()
    }

    fn set_last_commit_info(&self, info: Option<CommitInfo>) {
        *self.last_commit_info.write().unwrap() = info;
    }

    /// The latest commit id. Before any load, the version comes from the
    /// persisted latest-version marker with a zero hash.
    pub fn last_commit_id(&self) -> CommitId {
        match self.last_commit_info() {
            Some(info) => info.commit_id(),
            None => CommitId::new(codec::get_latest_version(&*self.db), Hash::ZERO),
        }
    }

    /// The root hash the next commit would produce, without committing.
    pub fn working_hash(&self) -> Hash {
        let stores = self.stores.read().unwrap();
        let mut infos = Vec::new();
        for (key, store) in stores.iter() {
            if matches!(
                store.store_type(),
                StoreType::Transient | StoreType::Memory
            ) {
                continue;
            }
            infos.push(StoreInfo::new(
                key.name(),
                CommitId::new(0, store.working_hash()),
            ));
        }
        CommitInfo::new(0, infos).hash()
    }

    /// The earliest version still retained (0 before any pruning).
    pub fn earliest_version(&self) -> i64 {
        self.earliest_version.load(Ordering::Relaxed)
    }

    // ── Commit / prune ───────────────────────────────────────────────

    /// Commit every sub-store and flush the metadata batch.
    ///
    /// With `bump_version` the commit creates the next version; without it
    /// the current version is re-committed. The first commit of an empty
    /// store lands on the configured initial version (or 1).
    ///
    /// Readers observe either the previous or the new commit info, never a
    /// partial state. A metadata flush failure terminates the process.
    pub fn commit(&self, bump_version: bool) -> CommitId {
        let start = Instant::now();

        let current = self.last_commit_info().map_or(0, |c| c.version());
        let initial = self.initial_version.load(Ordering::Relaxed);
        let mut previous_height = 0;
        let version = if current == 0 && initial > 1 {
            // No commit has been made yet; start from the initial version.
            initial
        } else if bump_version {
            previous_height = current;
            current + 1
        } else {
            current
        };

        let new_info = {
            let stores = self.stores.read().unwrap();
            commit_stores(version, &stores, bump_version)
        };
        self.set_last_commit_info(Some(new_info));

        // Schedule pruneHeight = previousHeight - keep_recent, unless it is
        // a retained snapshot height under keep_every.
        let opts = *self.pruning.lock().unwrap();
        if opts.interval > 0 && (opts.keep_recent as i64) < previous_height {
            let prune_height = previous_height - opts.keep_recent as i64;
            if opts.keep_every == 0 || prune_height % opts.keep_every as i64 != 0 {
                self.prune_heights.lock().unwrap().push(prune_height);
            }
        }

        // Batch-prune on interval heights.
        if opts.interval > 0 && version % opts.interval as i64 == 0 {
            self.prune_stores(true, &[]);
        }

        let info = self.last_commit_info().expect("commit info was just published");
        self.flush_metadata(version, Some(&info));

        let hash = info.hash();
        metrics::record_commit(version, start.elapsed().as_secs_f64());
        metrics::set_latest_version(version);
        CommitId::new(version, hash)
    }

    /// Batch-delete scheduled heights from every versioned sub-store.
    ///
    /// `extra_heights` are pruned in addition to the internal queue; with
    /// `clear_store_heights` the internal queue is folded in and cleared
    /// after a successful pass. Heights a store has already pruned are
    /// skipped; any other tree failure is fatal.
    pub fn prune_stores(&self, clear_store_heights: bool, extra_heights: &[i64]) {
        let mut heights = extra_heights.to_vec();
        if clear_store_heights {
            heights.extend(self.prune_heights.lock().unwrap().iter().copied());
        }
        if heights.is_empty() {
            return;
        }

        let start = Instant::now();
        {
            let stores = self.stores.read().unwrap();
            for (key, store) in stores.iter() {
                let Some(vs) = store.as_versioned() else {
                    continue;
                };
                if let Err(e) = vs.tree().delete_versions(&heights) {
                    match e {
                        trellis_tree::TreeError::VersionDoesNotExist(v) => {
                            tracing::debug!(store = key.name(), version = v, "height already pruned");
                        }
                        other => panic!(
                            "STATE CRITICAL: pruning failed for store {}: {other}",
                            key.name()
                        ),
                    }
                }
            }
        }

        if let Some(&last) = heights.last() {
            self.earliest_version.store(last, Ordering::Relaxed);
            metrics::set_earliest_version(last);
        }
        if clear_store_heights {
            self.prune_heights.lock().unwrap().clear();
        }

        metrics::record_versions_pruned(heights.len(), start.elapsed().as_secs_f64());
        tracing::debug!(count = heights.len(), "pruned versions");
    }

    /// Delete all versions after `target` and make it the latest.
    ///
    /// Every versioned sub-store is reloaded mutable at `target`, the
    /// commit info for `target` is rebuilt and flushed, and the store
    /// reloads from the new latest.
    pub fn rollback_to_version(&self, target: i64) -> Result<(), StoreError> {
        if target <= 0 {
            return Err(StoreError::InvalidRollbackTarget(target));
        }

        tracing::info!(target, "rolling back");
        {
            let stores = self.stores.read().unwrap();
            for (key, store) in stores.iter() {
                if let Some(vs) = store.as_versioned() {
                    let latest = vs.tree().load_version_for_overwriting(target)?;
                    tracing::info!(store = key.name(), height = latest, "reset store");
                }
            }

            let info = commit_stores(target, &stores, false);
            self.set_last_commit_info(Some(info));
        }

        let info = self.last_commit_info();
        self.flush_metadata(target, info.as_ref());
        self.load_latest_version()
    }

    /// Write the metadata batch for `version` synchronously.
    pub(crate) fn flush_metadata(&self, version: i64, info: Option<&CommitInfo>) {
        let mut batch = Batch::new();
        if let Some(info) = info {
            codec::flush_commit_info(&mut batch, version, info);
        }
        codec::flush_latest_version(&mut batch, version);
        codec::flush_pruning_heights(&mut batch, &self.prune_heights.lock().unwrap());

        self.db
            .write_batch(batch, true)
            .expect("STATE CRITICAL: metadata flush failed");

        if let Some(info) = info {
            tracing::info!(version = info.version(), hash = %info.hash(), "app state saved");
        }
    }

    /// Commit info for `version` built from the current sub-store commit
    /// ids (used after restore and rollback).
    pub(crate) fn build_commit_info(&self, version: i64) -> CommitInfo {
        let stores = self.stores.read().unwrap();
        let mut infos = Vec::new();
        for (key, store) in stores.iter() {
            if matches!(
                store.store_type(),
                StoreType::Transient | StoreType::Memory
            ) {
                continue;
            }
            infos.push(StoreInfo::new(key.name(), store.last_commit_id()));
        }
        CommitInfo::new(version, infos)
    }

    /// Versioned sub-stores in lexical name order, unwrapped for export.
    /// Fails if a non-snapshotable persistent store is mounted.
    pub(crate) fn snapshot_stores(
        &self,
    ) -> Result<Vec<(String, Arc<VersionedTree>)>, StoreError> {
        let stores = self.stores.read().unwrap();
        let mut out = Vec::new();
        for (key, store) in stores.iter() {
            match store {
                SubStore::Versioned(vs) => out.push((key.name().to_string(), vs.tree().clone())),
                // Non-persisted stores are not snapshotted.
                SubStore::Transient(_) | SubStore::Memory(_) => continue,
                other => {
                    return Err(StoreError::Unsnapshottable {
                        name: key.name().to_string(),
                        ty: other.store_type(),
                    })
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    // ── Store access ─────────────────────────────────────────────────

    /// The mounted sub-store for `key`.
    ///
    /// # Panics
    ///
    /// Panics if the key is not mounted (a configuration bug).
    pub fn get_store(&self, key: &StoreKey) -> SubStore {
        self.stores
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| panic!("store does not exist for key: {}", key.name()))
    }

    /// The sub-store mounted under `name`, if any.
    pub fn get_store_by_name(&self, name: &str) -> Option<SubStore> {
        let key = self.keys_by_name.read().unwrap().get(name)?.clone();
        Some(self.get_store(&key))
    }

    /// A KV view of the sub-store for `key`, with tracing and listeners
    /// applied when configured.
    ///
    /// # Panics
    ///
    /// Panics if the key is not mounted (a configuration bug).
    pub fn kv_store(&self, key: &StoreKey) -> KvView {
        let store = self.get_store(key);
        let tracer = self.tracer.lock().unwrap().clone();
        let listeners = self
            .listeners
            .read()
            .unwrap()
            .get(key.name())
            .cloned()
            .unwrap_or_default();
        KvView::new(
            key.name().to_string(),
            store,
            tracer,
            self.tracing_context(),
            listeners,
        )
    }

    // ── Branches ─────────────────────────────────────────────────────

    /// Branch the multi-store over its working state.
    ///
    /// Writes to the branch are invisible to this store until the branch's
    /// `write()` merges them.
    pub fn cache_multi_store(&self) -> CacheMultiStore {
        let stores = self.stores.read().unwrap();
        let targets = stores
            .iter()
            .map(|(key, store)| (key.clone(), BranchTarget::Live(store.clone())))
            .collect();

        CacheMultiStore::new(
            self.db.clone(),
            targets,
            self.keys_by_name.read().unwrap().clone(),
            self.tracer.lock().unwrap().clone(),
            self.tracing_context(),
            &self.listeners.read().unwrap(),
        )
    }

    /// Branch the multi-store at a past version.
    ///
    /// Versioned sub-stores are replaced by their immutable views at
    /// `version`; other store types pass through live. Fails if any
    /// versioned store cannot produce the view (version pruned or never
    /// committed).
    pub fn cache_multi_store_with_version(
        &self,
        version: i64,
    ) -> Result<CacheMultiStore, StoreError> {
        let stores = self.stores.read().unwrap();
        let mut targets = Vec::with_capacity(stores.len());
        for (key, store) in stores.iter() {
            let target = match store {
                SubStore::Versioned(vs) => {
                    let view = vs.tree().get_immutable(version).map_err(|source| {
                        StoreError::StoreLoad {
                            name: key.name().to_string(),
                            source,
                        }
                    })?;
                    BranchTarget::Frozen(Arc::new(view))
                }
                other => BranchTarget::Live(other.clone()),
            };
            targets.push((key.clone(), target));
        }

        Ok(CacheMultiStore::new(
            self.db.clone(),
            targets,
            self.keys_by_name.read().unwrap().clone(),
            self.tracer.lock().unwrap().clone(),
            self.tracing_context(),
            &self.listeners.read().unwrap(),
        ))
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Route a query to a sub-store, splicing the aggregation proof onto
    /// provable responses. Failures are encoded in the response.
    pub fn query(&self, req: &QueryRequest) -> QueryResponse {
        let start = Instant::now();
        let res = self.query_inner(req);
        metrics::record_query(start.elapsed().as_secs_f64());
        res
    }

    fn query_inner(&self, req: &QueryRequest) -> QueryResponse {
        let (store_name, subpath) = match parse_path(&req.path) {
            Ok(parts) => parts,
            Err(e) => return e.into_response(),
        };

        if store_name == PROOFS_PATH {
            return self.proofs_query(req);
        }

        let store = match self.get_store_by_name(&store_name) {
            Some(store) => store,
            None => {
                return QueryError::UnknownRequest(format!("no such store: {store_name}"))
                    .into_response()
            }
        };

        let sub_req = QueryRequest {
            path: subpath.clone(),
            data: req.data.clone(),
            height: req.height,
            prove: req.prove,
        };
        let mut res = match &store {
            SubStore::Versioned(vs) => vs.query(&sub_req),
            other => {
                return QueryError::UnknownRequest(format!(
                    "store {store_name} (type {:?}) doesn't support queries",
                    other.store_type()
                ))
                .into_response()
            }
        };

        if !req.prove || !require_proof(&subpath) {
            return res;
        }
        if !res.is_ok() {
            return res;
        }

        if res.proof_ops.as_ref().map_or(true, |p| p.ops.is_empty()) {
            return QueryError::InvalidRequest(
                "proof is unexpectedly empty; ensure height has not been pruned".to_string(),
            )
            .into_response();
        }

        // Use the cached commit info when the response height is the latest
        // commit (it may not be flushed to disk yet); otherwise read it back
        // from the metadata namespace.
        let commit_info = match self.last_commit_info() {
            Some(info) if info.version() == res.height => info,
            _ => match codec::get_commit_info(&*self.db, res.height) {
                Ok(info) => info,
                Err(e) => return QueryError::Internal(e.to_string()).into_response(),
            },
        };

        match commit_info.proof(&store_name) {
            Some(proof) => {
                res.proof_ops
                    .as_mut()
                    .expect("checked non-empty above")
                    .ops
                    .push(ProofOp {
                        op_type: PROOF_OP_MULTISTORE.to_string(),
                        key: store_name.into_bytes(),
                        data: wire::encode_merkle_proof(&proof),
                    });
                res
            }
            None => QueryError::Internal(format!(
                "store {store_name} missing from commit info at height {}",
                res.height
            ))
            .into_response(),
        }
    }

    /// `/proofs`: the commit root hash at the requested height, with one
    /// aggregation proof per store in the commit info.
    fn proofs_query(&self, req: &QueryRequest) -> QueryResponse {
        let commit_info = match codec::get_commit_info(&*self.db, req.height) {
            Ok(info) => info,
            Err(e) => return QueryError::Internal(e.to_string()).into_response(),
        };

        let mut ops = Vec::with_capacity(commit_info.store_infos().len());
        for si in commit_info.store_infos() {
            let proof = commit_info
                .proof(&si.name)
                .expect("store is present in its own commit info");
            ops.push(ProofOp {
                op_type: PROOF_OP_MULTISTORE.to_string(),
                key: si.name.clone().into_bytes(),
                data: wire::encode_merkle_proof(&proof),
            });
        }

        QueryResponse {
            height: req.height,
            key: PROOFS_PATH.as_bytes().to_vec(),
            value: commit_info.hash().to_bytes().to_vec(),
            proof_ops: Some(ProofOps { ops }),
            ..QueryResponse::default()
        }
    }

    // ── Tracing & listening ──────────────────────────────────────────

    /// Set the trace writer. Every KV operation through a view or a merged
    /// branch write emits one record.
    pub fn set_tracer(&self, writer: Box<dyn std::io::Write + Send>) {
        *self.tracer.lock().unwrap() = Some(Arc::new(Tracer::new(writer)));
    }

    /// Whether tracing is enabled.
    pub fn tracing_enabled(&self) -> bool {
        self.tracer.lock().unwrap().is_some()
    }

    /// Merge `context` into the tracing context; existing keys are
    /// overwritten.
    pub fn set_tracing_context(&self, context: TraceContext) {
        let mut current = self.trace_context.lock().unwrap();
        for (k, v) in context {
            current.insert(k, v);
        }
    }

    /// A defensive copy of the tracing context.
    pub fn tracing_context(&self) -> TraceContext {
        self.trace_context.lock().unwrap().clone()
    }

    /// Register write listeners for a store key.
    pub fn add_listeners(&self, key: &StoreKey, listeners: Vec<Arc<dyn WriteListener>>) {
        self.listeners
            .write()
            .unwrap()
            .entry(key.name().to_string())
            .or_default()
            .extend(listeners);
    }

    /// Whether any listener is registered for a store key.
    pub fn listening_enabled(&self, key: &StoreKey) -> bool {
        self.listeners
            .read()
            .unwrap()
            .get(key.name())
            .is_some_and(|ls| !ls.is_empty())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Close the shared database. Sub-store handles become unusable.
    pub fn close(&self) -> Result<(), StoreError> {
        self.db.close()?;
        Ok(())
    }
}

/// Commit every store and aggregate the persistent ones into a commit info.
///
/// Stores are committed in lexical name order; the resulting hash does not
/// depend on that order, but logs and traces do. Transient and memory
/// stores are committed (flushing transient state) but excluded from the
/// record.
fn commit_stores(
    version: i64,
    stores: &HashMap<StoreKey, SubStore>,
    bump_version: bool,
) -> CommitInfo {
    let mut ordered: Vec<(&StoreKey, &SubStore)> = stores.iter().collect();
    ordered.sort_by(|a, b| a.0.name().cmp(b.0.name()));

    let mut infos = Vec::with_capacity(ordered.len());
    for (key, store) in ordered {
        let commit_id = store.commit(bump_version);
        if matches!(
            store.store_type(),
            StoreType::Transient | StoreType::Memory
        ) {
            continue;
        }
        infos.push(StoreInfo::new(key.name(), commit_id));
    }

    CommitInfo::new(version, infos)
}

/// Delete every key in a store. Keys are snapshotted first: writes must
/// not interleave with iteration.
fn delete_kv_store(store: &SubStore) {
    let keys: Vec<Vec<u8>> = store.scan(None, None).map(|(k, _)| k).collect();
    for key in keys {
        store.delete(&key);
    }
}

/// Move is simulated by copy-all then delete-old.
fn move_kv_store_data(old: &SubStore, new: &SubStore) {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = old.scan(None, None).collect();
    for (key, value) in &entries {
        new.set(key, value);
    }
    delete_kv_store(old);
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_kv::MemoryDb;

    fn fresh_store() -> (MultiStore, StoreKey, StoreKey) {
        let db: DbRef = Arc::new(MemoryDb::new());
        let store = MultiStore::new(db);
        let a = StoreKey::kv("a");
        let b = StoreKey::kv("b");
        store.mount_store_with_db(a.clone(), StoreType::Versioned, None);
        store.mount_store_with_db(b.clone(), StoreType::Versioned, None);
        store.load_latest_version().unwrap();
        (store, a, b)
    }

    #[test]
    fn test_mount_and_load_empty() {
        let (store, a, _) = fresh_store();
        assert_eq!(store.last_commit_id(), CommitId::empty());
        assert_eq!(store.get_store(&a).last_commit_id(), CommitId::empty());
        assert_eq!(store.store_keys().len(), 2);
    }

    #[test]
    #[should_panic(expected = "duplicate store key name")]
    fn test_mount_duplicate_name_panics() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let store = MultiStore::new(db);
        store.mount_store_with_db(StoreKey::kv("dup"), StoreType::Versioned, None);
        store.mount_store_with_db(StoreKey::kv("dup"), StoreType::Versioned, None);
    }

    #[test]
    #[should_panic(expected = "duplicate store key")]
    fn test_mount_duplicate_identity_panics() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let store = MultiStore::new(db);
        let key = StoreKey::kv("dup");
        store.mount_store_with_db(key.clone(), StoreType::Versioned, None);
        store.mount_store_with_db(key, StoreType::Versioned, None);
    }

    #[test]
    fn test_wrong_key_kind_for_transient() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let store = MultiStore::new(db);
        store.mount_store_with_db(StoreKey::kv("t"), StoreType::Transient, None);
        assert!(matches!(
            store.load_latest_version(),
            Err(StoreError::InvalidKeyKind { .. })
        ));
    }

    #[test]
    fn test_commit_bumps_and_is_deterministic() {
        let (store, a, _) = fresh_store();
        store.kv_store(&a).set(b"k", b"v");
        let id1 = store.commit(true);
        assert_eq!(id1.version, 1);

        // identical history on a second instance yields the same root
        let (other, oa, _) = fresh_store();
        other.kv_store(&oa).set(b"k", b"v");
        let id2 = other.commit(true);
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_commit_hash_is_function_of_store_roots() {
        let (store, a, b) = fresh_store();
        store.kv_store(&a).set(b"k", b"v");
        let with_a = store.commit(true).hash;

        let (other, oa, ob) = fresh_store();
        other.kv_store(&ob).set(b"k", b"v");
        let with_b = other.commit(true).hash;

        // same payload under a different store name changes the root
        assert_ne!(with_a, with_b);
        let _ = (a, b, oa);
    }

    #[test]
    fn test_initial_version_commit() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let store = MultiStore::new(db);
        let key = StoreKey::kv("a");
        store.mount_store_with_db(key.clone(), StoreType::Versioned, None);
        store.load_latest_version().unwrap();
        store.set_initial_version(10);

        let id = store.commit(true);
        assert_eq!(id.version, 10);
        assert_eq!(store.get_store(&key).last_commit_id().version, 10);
    }

    #[test]
    fn test_transient_and_memory_excluded_from_commit_info() {
        let db: DbRef = Arc::new(MemoryDb::new());
        let store = MultiStore::new(db);
        let kv = StoreKey::kv("kv");
        let tr = StoreKey::transient("tr");
        let mem = StoreKey::memory("mem");
        store.mount_store_with_db(kv.clone(), StoreType::Versioned, None);
        store.mount_store_with_db(tr.clone(), StoreType::Transient, None);
        store.mount_store_with_db(mem.clone(), StoreType::Memory, None);
        store.load_latest_version().unwrap();

        store.kv_store(&kv).set(b"k", b"v");
        store.kv_store(&tr).set(b"t", b"v");
        store.kv_store(&mem).set(b"m", b"v");
        store.commit(true);

        let info = store.last_commit_info().unwrap();
        let names: Vec<&str> = info.store_infos().iter().map(|si| si.name.as_str()).collect();
        assert_eq!(names, vec!["kv"]);

        // transient cleared, memory kept
        assert_eq!(store.kv_store(&tr).get(b"t"), None);
        assert_eq!(store.kv_store(&mem).get(b"m"), Some(b"v".to_vec()));
    }

    #[test]
    fn test_working_hash_matches_next_commit() {
        let (store, a, _) = fresh_store();
        store.kv_store(&a).set(b"k", b"v");
        let preview = store.working_hash();
        let id = store.commit(true);
        assert_eq!(preview, id.hash);
    }

    #[test]
    fn test_recommit_keeps_version() {
        let (store, a, _) = fresh_store();
        store.kv_store(&a).set(b"k", b"v");
        let id1 = store.commit(true);
        store.kv_store(&a).set(b"k2", b"v2");
        let id2 = store.commit(false);
        assert_eq!(id2.version, id1.version);
        assert_ne!(id2.hash, id1.hash);
    }

    #[test]
    fn test_tracing_context_defensive_copy() {
        let (store, _, _) = fresh_store();
        let mut ctx = TraceContext::new();
        ctx.insert("blockHeight".into(), "1".into());
        store.set_tracing_context(ctx);

        let mut copy = store.tracing_context();
        copy.insert("mutated".into(), "yes".into());
        assert!(!store.tracing_context().contains_key("mutated"));

        let mut merge = TraceContext::new();
        merge.insert("blockHeight".into(), "2".into());
        store.set_tracing_context(merge);
        assert_eq!(
            store.tracing_context().get("blockHeight"),
            Some(&"2".to_string())
        );
    }
}
