//! In-memory database backend.

use crate::db::{Batch, BatchOp, Database, KvError};
use im::OrdMap;
use std::sync::RwLock;

/// In-memory [`Database`] on `im::OrdMap`.
///
/// Uses structural sharing for O(1) clones, so scans iterate a snapshot taken
/// at call time without copying the dataset and without holding the lock.
/// Suitable for tests, transient state, and deterministic simulation.
#[derive(Default)]
pub struct MemoryDb {
    map: RwLock<OrdMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryDb {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    /// Whether the database is empty.
    pub fn is_empty(&self) -> bool {
        self.map.read().unwrap().is_empty()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        *self.map.write().unwrap() = OrdMap::new();
    }

    fn snapshot(&self) -> OrdMap<Vec<u8>, Vec<u8>> {
        self.map.read().unwrap().clone()
    }
}

impl Database for MemoryDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.map.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.map.write().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.map.write().unwrap().remove(key);
        Ok(())
    }

    fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        let snapshot = self.snapshot();
        let start = start.map(<[u8]>::to_vec);
        let end = end.map(<[u8]>::to_vec);

        // The map iterates in key order, so the bounds reduce to skip/take.
        let iter = snapshot
            .into_iter()
            .skip_while(move |(k, _)| match &start {
                Some(s) => k.as_slice() < s.as_slice(),
                None => false,
            })
            .take_while(move |(k, _)| match &end {
                Some(e) => k.as_slice() < e.as_slice(),
                None => true,
            });
        Box::new(iter)
    }

    fn write_batch(&self, batch: Batch, _sync: bool) -> Result<(), KvError> {
        let mut map = self.map.write().unwrap();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}
