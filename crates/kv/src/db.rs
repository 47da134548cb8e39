//! The database trait and atomic write batches.

use std::sync::Arc;

/// Shared handle to a database backend.
pub type DbRef = Arc<dyn Database>;

/// Error type for key-value backends.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    /// Backend-reported failure (I/O, corruption, closed handle).
    #[error("database error: {0}")]
    Backend(String),
}

/// One operation in a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set `key` to `value`.
    Set {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Delete `key`.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// An ordered set of writes applied atomically by [`Database::write_batch`].
///
/// Operations are applied in insertion order, so a later op on the same key
/// wins.
#[derive(Debug, Default, Clone)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a set operation.
    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Set {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Queue a delete operation.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued operations in order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume the batch, returning its operations.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// A persistent key-value engine.
///
/// All methods take `&self`; implementations use interior mutability and are
/// safe for concurrent readers. Scans are ascending over `[start, end)` with
/// `None` meaning unbounded.
pub trait Database: Send + Sync {
    /// Point read.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Point write.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Point delete. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    /// Ascending scan over `[start, end)`.
    ///
    /// The iterator observes a consistent view taken at call time; concurrent
    /// writes do not surface mid-scan.
    fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>;

    /// Apply a batch atomically. With `sync`, the write is durable before
    /// returning.
    fn write_batch(&self, batch: Batch, sync: bool) -> Result<(), KvError>;

    /// Release backend resources. Further calls may fail.
    fn close(&self) -> Result<(), KvError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_preserves_order() {
        let mut batch = Batch::new();
        batch.set(b"k".to_vec(), b"v1".to_vec());
        batch.delete(b"k".to_vec());
        batch.set(b"k".to_vec(), b"v2".to_vec());
        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[2], BatchOp::Set { .. }));
    }
}
