//! Inter-block read cache.
//!
//! A process-wide cache registered once on the multi-store. Each versioned
//! sub-store is transparently wrapped at load time: reads populate the
//! cache, writes keep it coherent, and the cache survives across commits
//! (unlike a branch, which dies with its write-set). Low-level operations
//! (pruning, export, immutable views, rollback) bypass the wrapper through
//! the `tree()` capability.

use quick_cache::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Read cache for one store's keyspace.
pub struct StoreCache {
    cache: Cache<Vec<u8>, Vec<u8>>,
}

impl StoreCache {
    fn new(capacity: usize) -> Self {
        Self {
            cache: Cache::new(capacity),
        }
    }

    /// Cached value for `key`, if any. Misses are not cached.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.get(key)
    }

    /// Record a read or write.
    pub fn insert(&self, key: &[u8], value: &[u8]) {
        self.cache.insert(key.to_vec(), value.to_vec());
    }

    /// Drop a key after a delete.
    pub fn remove(&self, key: &[u8]) {
        self.cache.remove(key);
    }
}

/// Process-wide registry of per-store caches.
///
/// The manager hands out one [`StoreCache`] per store name, so a store keeps
/// its cache across reloads and upgrades.
pub struct BlockCacheManager {
    capacity_per_store: usize,
    caches: Mutex<HashMap<String, Arc<StoreCache>>>,
}

impl BlockCacheManager {
    /// Create a manager whose per-store caches hold up to
    /// `capacity_per_store` entries.
    pub fn new(capacity_per_store: usize) -> Self {
        Self {
            capacity_per_store,
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// The cache for the named store, created on first use.
    pub fn cache_for(&self, name: &str) -> Arc<StoreCache> {
        let mut caches = self.caches.lock().unwrap();
        caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(StoreCache::new(self.capacity_per_store)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_round_trip() {
        let cache = StoreCache::new(16);
        assert_eq!(cache.get(b"k"), None);
        cache.insert(b"k", b"v");
        assert_eq!(cache.get(b"k"), Some(b"v".to_vec()));
        cache.remove(b"k");
        assert_eq!(cache.get(b"k"), None);
    }

    #[test]
    fn test_manager_reuses_per_store_cache() {
        let manager = BlockCacheManager::new(16);
        let a1 = manager.cache_for("a");
        a1.insert(b"k", b"v");

        let a2 = manager.cache_for("a");
        assert_eq!(a2.get(b"k"), Some(b"v".to_vec()));

        let b = manager.cache_for("b");
        assert_eq!(b.get(b"k"), None);
    }
}
