//! Typed store keys and the closed store-type variant.

use std::fmt;
use std::hash::{Hash as StdHash, Hasher};
use std::sync::Arc;

/// The flavor a [`StoreKey`] was minted with.
///
/// Transient and memory mounting require the matching flavor; this is checked
/// when the store is constructed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Ordinary persistent key-value store key.
    Kv,
    /// Key for a transient store (cleared on every commit).
    Transient,
    /// Key for an in-process memory store.
    Memory,
}

#[derive(Debug)]
struct KeyInner {
    name: String,
    kind: StoreKind,
}

/// An opaque typed identifier for one mounted sub-store.
///
/// Equality and hashing are by *identity*, not by name: two keys minted with
/// the same name are distinct, and the registry rejects a remount under
/// either dimension. Modules hold their key and use it as the capability to
/// reach their store.
#[derive(Clone)]
pub struct StoreKey(Arc<KeyInner>);

impl StoreKey {
    /// Mint a key for a persistent key-value sub-store.
    pub fn kv(name: impl Into<String>) -> Self {
        Self::mint(name.into(), StoreKind::Kv)
    }

    /// Mint a key for a transient sub-store.
    pub fn transient(name: impl Into<String>) -> Self {
        Self::mint(name.into(), StoreKind::Transient)
    }

    /// Mint a key for a memory sub-store.
    pub fn memory(name: impl Into<String>) -> Self {
        Self::mint(name.into(), StoreKind::Memory)
    }

    fn mint(name: String, kind: StoreKind) -> Self {
        assert!(!name.is_empty(), "store key name cannot be empty");
        Self(Arc::new(KeyInner { name, kind }))
    }

    /// The store name this key addresses.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The flavor this key was minted with.
    pub fn kind(&self) -> StoreKind {
        self.0.kind
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for StoreKey {}

impl StdHash for StoreKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({:?}, {:?})", self.0.name, self.0.kind)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The closed set of sub-store types the multi-store can mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// Versioned Merkle sub-store: historical reads, proofs, snapshots.
    Versioned,
    /// Raw key-value adapter over the prefixed database; no Merkle ops.
    Database,
    /// In-memory store cleared on each commit.
    Transient,
    /// Persistent in-process memory store.
    Memory,
    /// A multi-store. Mounting one inside another is rejected.
    Multi,
}
