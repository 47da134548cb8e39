//! Write listeners.
//!
//! Listeners registered per store key observe every write and delete that
//! flows through a [`KvView`](crate::substore::KvView) or a merged branch
//! write. The multi-store only consumes the interface; state-streaming
//! services implement it.

/// Observer of state writes for one or more stores.
pub trait WriteListener: Send + Sync {
    /// Called after a write or delete is applied.
    ///
    /// `value` is `None` and `delete` is `true` for deletes.
    fn on_write(&self, store_name: &str, key: &[u8], value: Option<&[u8]>, delete: bool);
}
