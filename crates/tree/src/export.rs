//! Deterministic export and resumable import of committed versions.

use crate::tree::{ImmutableTree, TreeError, VersionedTree};
use im::OrdMap;
use std::sync::Arc;
use trellis_types::CommitId;

/// One record of an export stream.
///
/// Leaves carry `height == 0` with the key-value pair; positive heights
/// describe inner nodes. This tree materializes leaves and reconstructs
/// inner structure, so its own exports emit leaves only, but imports accept
/// full node streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNode {
    /// Leaf key (empty for inner nodes).
    pub key: Vec<u8>,
    /// Leaf value (empty for inner nodes).
    pub value: Vec<u8>,
    /// Node height in the source tree; 0 for leaves.
    pub height: i8,
    /// Version the node was created at.
    pub version: i64,
}

/// Streams the leaves of one committed version in ascending key order.
///
/// The exporter holds a detached view, so concurrent commits at higher
/// versions do not affect the emitted sequence. Two exports of the same
/// version produce identical streams.
pub struct Exporter {
    version: i64,
    items: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Exporter {
    pub(crate) fn new(view: ImmutableTree) -> Self {
        let version = view.version();
        let items: Vec<(Vec<u8>, Vec<u8>)> = view.into_leaves().into_iter().collect();
        Self {
            version,
            items: items.into_iter(),
        }
    }

    /// The next node, or `None` when the export is done.
    pub fn next(&mut self) -> Option<ExportNode> {
        self.items.next().map(|(key, value)| ExportNode {
            key,
            value,
            height: 0,
            version: self.version,
        })
    }
}

/// Rebuilds one store at a fixed version from an export stream.
///
/// Dropping the importer without calling [`Importer::commit`] discards all
/// added nodes.
pub struct Importer {
    tree: Arc<VersionedTree>,
    version: i64,
    leaves: OrdMap<Vec<u8>, Vec<u8>>,
}

impl Importer {
    /// Open an importer that will commit at `version`. The target tree must
    /// be empty.
    pub fn new(tree: Arc<VersionedTree>, version: i64) -> Self {
        Self {
            tree,
            version,
            leaves: OrdMap::new(),
        }
    }

    /// Add one node from the stream.
    ///
    /// Inner nodes (positive height) are accepted and skipped; the tree
    /// structure is reconstructed from the leaf set on commit.
    pub fn add(&mut self, node: ExportNode) -> Result<(), TreeError> {
        if node.height != 0 {
            return Ok(());
        }
        self.leaves.insert(node.key, node.value);
        Ok(())
    }

    /// Persist the imported version and publish it as the tree's state.
    pub fn commit(self) -> Result<CommitId, TreeError> {
        self.tree.finish_import(self.version, self.leaves)
    }
}
