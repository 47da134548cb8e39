//! Snapshot export and restore.
//!
//! A snapshot is a stream of length-delimited [`SnapshotItemPb`] records:
//! one store marker per versioned sub-store in lexical name order, each
//! followed by that store's exported nodes. The stream is consensus
//! critical: two exports of the same height are byte-identical, on every
//! node.

use crate::error::StoreError;
use crate::store::MultiStore;
use crate::wire::{snapshot_item, SnapshotItemPb, SnapshotNodeItemPb, SnapshotStoreItemPb, WireError};
use prost::Message;
use std::io::{ErrorKind, Read, Write};
use trellis_metrics as metrics;
use trellis_tree::{ExportNode, Importer};

/// Writes length-delimited snapshot records onto a byte sink.
pub struct SnapshotWriter<W: Write> {
    inner: W,
}

impl<W: Write> SnapshotWriter<W> {
    /// Wrap a sink.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub(crate) fn write_item(&mut self, item: &SnapshotItemPb) -> Result<(), StoreError> {
        let buf = item.encode_length_delimited_to_vec();
        self.inner.write_all(&buf)?;
        Ok(())
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Reads length-delimited snapshot records from a byte source.
pub struct SnapshotReader<R: Read> {
    inner: R,
}

impl<R: Read> SnapshotReader<R> {
    /// Wrap a source.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// The next record, or `None` at a clean end of stream.
    pub(crate) fn read_item(&mut self) -> Result<Option<SnapshotItemPb>, StoreError> {
        let mut len: u64 = 0;
        let mut shift = 0u32;
        let mut first_byte = true;

        loop {
            let mut byte = [0u8; 1];
            match self.inner.read_exact(&mut byte) {
                Ok(()) => {}
                // EOF on a record boundary ends the stream; EOF inside a
                // record is corruption.
                Err(e) if e.kind() == ErrorKind::UnexpectedEof && first_byte => return Ok(None),
                Err(e) => return Err(e.into()),
            }
            first_byte = false;

            len |= u64::from(byte[0] & 0x7f) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 64 {
                return Err(StoreError::MalformedSnapshot(
                    "record length varint overflows".to_string(),
                ));
            }
        }

        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf)?;
        let item = SnapshotItemPb::decode(buf.as_slice()).map_err(WireError::from)?;
        Ok(Some(item))
    }
}

impl MultiStore {
    /// Export the state at `height` as a snapshot record stream.
    ///
    /// `height` must be a committed version: `(0, latest]`. Only versioned
    /// sub-stores are exported (transient and memory stores are skipped;
    /// any other persistent type fails). Stores are emitted in lexical name
    /// order, so the stream is deterministic.
    pub fn snapshot<W: Write>(
        &self,
        height: u64,
        writer: &mut SnapshotWriter<W>,
    ) -> Result<(), StoreError> {
        if height == 0 {
            return Err(StoreError::SnapshotHeightZero);
        }
        let latest = self.last_commit_id().version;
        if height > latest as u64 {
            return Err(StoreError::SnapshotFutureHeight { height, latest });
        }

        for (name, tree) in self.snapshot_stores()? {
            let mut exporter = tree.export(height as i64).map_err(|source| {
                StoreError::StoreLoad {
                    name: name.clone(),
                    source,
                }
            })?;

            writer.write_item(&SnapshotItemPb {
                item: Some(snapshot_item::Item::Store(SnapshotStoreItemPb {
                    name: name.clone(),
                })),
            })?;
            tracing::info!(store = %name, height, "exporting snapshot store");

            let mut num_keys = 0u64;
            let mut key_bytes = 0u64;
            let mut value_bytes = 0u64;
            while let Some(node) = exporter.next() {
                num_keys += 1;
                key_bytes += node.key.len() as u64;
                value_bytes += node.value.len() as u64;

                writer.write_item(&SnapshotItemPb {
                    item: Some(snapshot_item::Item::Node(SnapshotNodeItemPb {
                        key: node.key,
                        value: node.value,
                        height: i32::from(node.height),
                        version: node.version,
                    })),
                })?;
            }

            metrics::record_snapshot_store_exported(&name, num_keys, key_bytes, value_bytes);
            tracing::info!(
                store = %name,
                num_keys,
                key_bytes,
                value_bytes,
                "exported snapshot store"
            );
        }

        Ok(())
    }

    /// Restore a snapshot stream into this (empty) store at `height`.
    ///
    /// Runs the import state machine: a store record opens an importer for
    /// the named (versioned) sub-store; node records feed it; the next
    /// store record commits and rotates. A record this layer does not
    /// recognize stops the loop and is returned intact so an outer driver
    /// can continue with it; a clean end of stream returns `None`.
    ///
    /// On success the commit info for `height` is rebuilt from the imported
    /// stores, metadata is flushed, and the store reloads from the new
    /// latest.
    pub fn restore<R: Read>(
        &self,
        height: u64,
        reader: &mut SnapshotReader<R>,
    ) -> Result<Option<SnapshotItemPb>, StoreError> {
        let mut importer: Option<(String, Importer)> = None;
        let mut imported_nodes = 0u64;

        let terminator = loop {
            let item = match reader.read_item()? {
                Some(item) => item,
                None => break None,
            };

            match item.item {
                Some(snapshot_item::Item::Store(store_item)) => {
                    if let Some((name, done)) = importer.take() {
                        done.commit()?;
                        metrics::record_snapshot_store_imported(&name, imported_nodes);
                        imported_nodes = 0;
                    }

                    let tree = self
                        .get_store_by_name(&store_item.name)
                        .and_then(|store| store.as_versioned().map(|vs| vs.tree().clone()))
                        .ok_or_else(|| StoreError::NonVersionedImport(store_item.name.clone()))?;

                    tracing::info!(store = %store_item.name, height, "importing snapshot store");
                    importer = Some((store_item.name, Importer::new(tree, height as i64)));
                }

                Some(snapshot_item::Item::Node(node)) => {
                    let Some((_, current)) = importer.as_mut() else {
                        return Err(StoreError::NodeBeforeStore);
                    };
                    if node.height > i32::from(i8::MAX) {
                        return Err(StoreError::NodeHeightTooLarge(node.height));
                    }

                    // The wire format cannot distinguish empty from absent
                    // bytes; prost already decodes both to empty vectors,
                    // which is exactly the normalization the tree requires
                    // for keys and leaf values.
                    current.add(ExportNode {
                        key: node.key,
                        value: node.value,
                        height: node.height as i8,
                        version: node.version,
                    })?;
                    imported_nodes += 1;
                }

                // A record kind from a newer protocol: hand it back intact.
                None => break Some(item),
            }
        };

        if let Some((name, done)) = importer.take() {
            done.commit()?;
            metrics::record_snapshot_store_imported(&name, imported_nodes);
        }

        let info = self.build_commit_info(height as i64);
        self.flush_metadata(height as i64, Some(&info));
        self.load_latest_version()?;

        Ok(terminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_clean_eof() {
        let mut reader = SnapshotReader::new(&[][..]);
        assert!(reader.read_item().unwrap().is_none());
    }

    #[test]
    fn test_reader_truncated_record_fails() {
        // claims 100 bytes, provides 2
        let mut bytes = vec![100u8];
        bytes.extend_from_slice(&[1, 2]);
        let mut reader = SnapshotReader::new(bytes.as_slice());
        assert!(matches!(
            reader.read_item(),
            Err(StoreError::SnapshotIo(_))
        ));
    }

    #[test]
    fn test_writer_reader_roundtrip() {
        let mut writer = SnapshotWriter::new(Vec::new());
        let store_item = SnapshotItemPb {
            item: Some(snapshot_item::Item::Store(SnapshotStoreItemPb {
                name: "acc".into(),
            })),
        };
        let node_item = SnapshotItemPb {
            item: Some(snapshot_item::Item::Node(SnapshotNodeItemPb {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                height: 0,
                version: 3,
            })),
        };
        writer.write_item(&store_item).unwrap();
        writer.write_item(&node_item).unwrap();

        let bytes = writer.into_inner();
        let mut reader = SnapshotReader::new(bytes.as_slice());
        assert_eq!(reader.read_item().unwrap(), Some(store_item));
        assert_eq!(reader.read_item().unwrap(), Some(node_item));
        assert_eq!(reader.read_item().unwrap(), None);
    }
}
