//! Shared test helpers for multi-store tests.
//!
//! Provides reusable builders for mounted multi-stores over in-memory
//! databases so that unit tests and the end-to-end suite share a single
//! source of truth.

use crate::key::{StoreKey, StoreType};
use crate::store::MultiStore;
use std::sync::Arc;
use trellis_kv::{DbRef, MemoryDb};

/// Build a multi-store over a fresh in-memory database with one versioned
/// sub-store per name, loaded at the latest (empty) version.
pub fn mounted_store(names: &[&str]) -> (MultiStore, Vec<StoreKey>) {
    mounted_store_on(Arc::new(MemoryDb::new()), names)
}

/// Build a multi-store over `db` with one versioned sub-store per name,
/// loaded at the latest version.
pub fn mounted_store_on(db: DbRef, names: &[&str]) -> (MultiStore, Vec<StoreKey>) {
    let store = MultiStore::new(db);
    let keys: Vec<StoreKey> = names.iter().map(|name| StoreKey::kv(*name)).collect();
    for key in &keys {
        store.mount_store_with_db(key.clone(), StoreType::Versioned, None);
    }
    store
        .load_latest_version()
        .expect("loading an empty store cannot fail");
    (store, keys)
}

/// Write `pairs` into the named sub-store.
pub fn fill_store(store: &MultiStore, key: &StoreKey, pairs: &[(&[u8], &[u8])]) {
    let view = store.kv_store(key);
    for (k, v) in pairs {
        view.set(k, v);
    }
}
