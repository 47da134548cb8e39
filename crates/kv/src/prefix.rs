//! Prefixed database views.

use crate::db::{Batch, BatchOp, Database, DbRef, KvError};

/// Compute the exclusive end key for a prefix scan.
///
/// Returns `None` if the prefix is all `0xFF` bytes (no valid exclusive upper
/// bound). In practice this never happens with structured storage keys.
pub fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    debug_assert!(!prefix.is_empty(), "next_prefix called with empty prefix");
    let mut next = prefix.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] < 255 {
            next[i] += 1;
            next.truncate(i + 1);
            return Some(next);
        }
    }
    None
}

/// A namespaced view over a shared [`Database`].
///
/// Every key is transparently prefixed on the way in and stripped on the way
/// out, so two views with different prefixes never observe each other's data.
/// The multi-store uses this to isolate sub-stores inside its root database.
pub struct PrefixDb {
    inner: DbRef,
    prefix: Vec<u8>,
}

impl PrefixDb {
    /// Create a view over `inner` under `prefix`.
    pub fn new(inner: DbRef, prefix: impl Into<Vec<u8>>) -> Self {
        let prefix = prefix.into();
        assert!(!prefix.is_empty(), "PrefixDb requires a non-empty prefix");
        Self { inner, prefix }
    }

    fn prefixed(&self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + key.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(key);
        out
    }
}

impl Database for PrefixDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        self.inner.get(&self.prefixed(key))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError> {
        self.inner.set(&self.prefixed(key), value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.inner.delete(&self.prefixed(key))
    }

    fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_> {
        let scan_start = match start {
            Some(s) => self.prefixed(s),
            None => self.prefix.clone(),
        };
        let scan_end = match end {
            Some(e) => Some(self.prefixed(e)),
            // Unbounded within the namespace: everything below the next prefix.
            None => next_prefix(&self.prefix),
        };

        let prefix_len = self.prefix.len();
        let iter = self
            .inner
            .scan(Some(&scan_start), scan_end.as_deref())
            .map(move |(k, v)| (k[prefix_len..].to_vec(), v));
        Box::new(iter)
    }

    fn write_batch(&self, batch: Batch, sync: bool) -> Result<(), KvError> {
        let mut rewritten = Batch::new();
        for op in batch.into_ops() {
            match op {
                BatchOp::Set { key, value } => rewritten.set(self.prefixed(&key), value),
                BatchOp::Delete { key } => rewritten.delete(self.prefixed(&key)),
            }
        }
        self.inner.write_batch(rewritten, sync)
    }
}
