//! Multi-store metadata: persisted keys and byte layouts.
//!
//! The shared database carries, alongside the sub-store namespaces:
//!
//! - `s/latest` → protobuf int64 wrapper, the latest committed version
//! - `s/pruneheights` → packed big-endian u64 sequence of scheduled heights
//! - `s/<decimal version>` → protobuf [`CommitInfo`] for that version

use crate::error::StoreError;
use crate::wire;
use trellis_kv::{Batch, Database};
use trellis_types::CommitInfo;

/// Key holding the latest committed version.
pub const LATEST_VERSION_KEY: &[u8] = b"s/latest";

/// Key holding the packed pruning-heights list.
pub const PRUNE_HEIGHTS_KEY: &[u8] = b"s/pruneheights";

/// Key holding the commit info for `version`.
pub fn commit_info_key(version: i64) -> Vec<u8> {
    format!("s/{version}").into_bytes()
}

/// Prefix for the namespace of the sub-store called `name` in the shared
/// database.
pub fn store_prefix(name: &str) -> Vec<u8> {
    format!("s/k:{name}/").into_bytes()
}

/// Prefix used when a sub-store was mounted with its own dedicated database.
pub const DEDICATED_DB_PREFIX: &[u8] = b"s/_/";

/// Prefix for the read-only view of `name` at `version` in an archival
/// database.
pub fn archival_store_prefix(version: i64, name: &str) -> Vec<u8> {
    let mut prefix = (version as u64).to_be_bytes().to_vec();
    prefix.extend_from_slice(&store_prefix(name));
    prefix
}

/// Read the latest committed version; 0 when nothing has been committed.
///
/// # Panics
///
/// Panics on backend or decode failure: the marker is written on every
/// commit, so either means the database is unusable.
pub fn get_latest_version(db: &dyn Database) -> i64 {
    match db
        .get(LATEST_VERSION_KEY)
        .expect("STATE CRITICAL: failed to read latest version")
    {
        None => 0,
        Some(bytes) => wire::decode_latest_version(&bytes)
            .expect("STATE CRITICAL: corrupt latest version marker"),
    }
}

/// Read the commit info persisted for `version`.
pub fn get_commit_info(db: &dyn Database, version: i64) -> Result<CommitInfo, StoreError> {
    let bytes = db
        .get(&commit_info_key(version))?
        .ok_or(StoreError::CommitInfoNotFound { version })?;
    Ok(wire::decode_commit_info(&bytes)?)
}

/// Read the scheduled pruning heights; empty when none are persisted.
pub fn get_pruning_heights(db: &dyn Database) -> Result<Vec<i64>, StoreError> {
    let bytes = match db.get(PRUNE_HEIGHTS_KEY)? {
        None => return Ok(Vec::new()),
        Some(bytes) => bytes,
    };
    if bytes.len() % 8 != 0 {
        return Err(StoreError::CorruptMetadata(format!(
            "pruning heights length {} is not a multiple of 8",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| u64::from_be_bytes(chunk.try_into().expect("chunk is 8 bytes")) as i64)
        .collect())
}

/// Queue the commit info for `version` into a metadata batch.
pub fn flush_commit_info(batch: &mut Batch, version: i64, info: &CommitInfo) {
    batch.set(commit_info_key(version), wire::encode_commit_info(info));
}

/// Queue the latest-version marker into a metadata batch.
pub fn flush_latest_version(batch: &mut Batch, version: i64) {
    batch.set(LATEST_VERSION_KEY.to_vec(), wire::encode_latest_version(version));
}

/// Queue the packed pruning-heights list into a metadata batch.
pub fn flush_pruning_heights(batch: &mut Batch, heights: &[i64]) {
    let mut bytes = Vec::with_capacity(heights.len() * 8);
    for height in heights {
        bytes.extend_from_slice(&(*height as u64).to_be_bytes());
    }
    batch.set(PRUNE_HEIGHTS_KEY.to_vec(), bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_kv::MemoryDb;
    use trellis_types::{CommitId, Hash, StoreInfo};

    #[test]
    fn test_latest_version_roundtrip() {
        let db = MemoryDb::new();
        assert_eq!(get_latest_version(&db), 0);

        let mut batch = Batch::new();
        flush_latest_version(&mut batch, 42);
        db.write_batch(batch, true).unwrap();
        assert_eq!(get_latest_version(&db), 42);
    }

    #[test]
    fn test_commit_info_roundtrip() {
        let db = MemoryDb::new();
        let info = CommitInfo::new(
            3,
            vec![StoreInfo::new(
                "acc",
                CommitId::new(3, Hash::from_bytes(b"acc")),
            )],
        );

        let mut batch = Batch::new();
        flush_commit_info(&mut batch, 3, &info);
        db.write_batch(batch, true).unwrap();

        assert_eq!(get_commit_info(&db, 3).unwrap(), info);
        assert!(matches!(
            get_commit_info(&db, 4),
            Err(StoreError::CommitInfoNotFound { version: 4 })
        ));
    }

    #[test]
    fn test_pruning_heights_packing() {
        let db = MemoryDb::new();
        assert!(get_pruning_heights(&db).unwrap().is_empty());

        let mut batch = Batch::new();
        flush_pruning_heights(&mut batch, &[1, 2, 100]);
        db.write_batch(batch, true).unwrap();

        let bytes = db.get(PRUNE_HEIGHTS_KEY).unwrap().unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(get_pruning_heights(&db).unwrap(), vec![1, 2, 100]);

        // truncated payload is rejected
        db.set(PRUNE_HEIGHTS_KEY, &bytes[..10]).unwrap();
        assert!(matches!(
            get_pruning_heights(&db),
            Err(StoreError::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(commit_info_key(12), b"s/12".to_vec());
        assert_eq!(store_prefix("bank"), b"s/k:bank/".to_vec());
        let archival = archival_store_prefix(1, "bank");
        assert_eq!(&archival[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&archival[8..], b"s/k:bank/");
    }
}
