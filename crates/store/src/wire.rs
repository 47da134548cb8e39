//! Consensus-critical wire forms.
//!
//! Everything that must be byte-identical across implementations is encoded
//! with protobuf: the per-version [`CommitInfo`] record, the latest-version
//! marker, the snapshot record stream, Merkle proof payloads, and the
//! subspace-query result pairs. Domain types convert through the `*Pb`
//! messages here; nothing else in the workspace touches prost directly.

use prost::Message;
use trellis_types::{CommitId, CommitInfo, Hash, MerkleProof, ProofStep, StoreInfo};

/// Wire decode failures.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Protobuf decode failure.
    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    /// Hash fields must be empty or exactly 32 bytes.
    #[error("invalid hash length {0}, want 0 or 32")]
    InvalidHashLength(usize),
}

// ═══════════════════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone, PartialEq, Message)]
pub struct CommitIdPb {
    #[prost(int64, tag = "1")]
    pub version: i64,
    /// Empty for the empty commit id; 32 bytes otherwise.
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StoreInfoPb {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub commit_id: Option<CommitIdPb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommitInfoPb {
    #[prost(int64, tag = "1")]
    pub version: i64,
    #[prost(message, repeated, tag = "2")]
    pub store_infos: Vec<StoreInfoPb>,
}

/// Wrapper for the `s/latest` value (a standalone int64 message).
#[derive(Clone, PartialEq, Message)]
pub struct Int64ValuePb {
    #[prost(int64, tag = "1")]
    pub value: i64,
}

/// Begins a new store segment in a snapshot stream.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotStoreItemPb {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// One exported tree node in a snapshot stream.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotNodeItemPb {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    #[prost(int32, tag = "3")]
    pub height: i32,
    #[prost(int64, tag = "4")]
    pub version: i64,
}

/// One record of the snapshot stream.
///
/// Unknown variants decode with `item == None`; the restore loop returns
/// such records to the caller intact so an outer driver can continue.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotItemPb {
    #[prost(oneof = "snapshot_item::Item", tags = "1, 2")]
    pub item: Option<snapshot_item::Item>,
}

/// Oneof payload of [`SnapshotItemPb`].
pub mod snapshot_item {
    /// The record variants of a snapshot stream.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Item {
        /// Store segment marker.
        #[prost(message, tag = "1")]
        Store(super::SnapshotStoreItemPb),
        /// Exported node.
        #[prost(message, tag = "2")]
        Node(super::SnapshotNodeItemPb),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ProofStepPb {
    /// Whether the sibling is the left combiner input.
    #[prost(bool, tag = "1")]
    pub left: bool,
    #[prost(bytes = "vec", tag = "2")]
    pub sibling: Vec<u8>,
}

/// Payload carried in a `ProofOp.data`.
#[derive(Clone, PartialEq, Message)]
pub struct MerkleProofPb {
    #[prost(message, repeated, tag = "1")]
    pub steps: Vec<ProofStepPb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PairPb {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// Subspace query result payload.
#[derive(Clone, PartialEq, Message)]
pub struct PairsPb {
    #[prost(message, repeated, tag = "1")]
    pub pairs: Vec<PairPb>,
}

// ═══════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════

fn hash_to_wire(hash: Hash) -> Vec<u8> {
    if hash.is_zero() {
        Vec::new()
    } else {
        hash.to_bytes().to_vec()
    }
}

fn hash_from_wire(bytes: &[u8]) -> Result<Hash, WireError> {
    match bytes.len() {
        0 => Ok(Hash::ZERO),
        32 => Ok(Hash::from_hash_bytes(bytes)),
        n => Err(WireError::InvalidHashLength(n)),
    }
}

impl From<CommitId> for CommitIdPb {
    fn from(id: CommitId) -> Self {
        Self {
            version: id.version,
            hash: hash_to_wire(id.hash),
        }
    }
}

impl TryFrom<CommitIdPb> for CommitId {
    type Error = WireError;

    fn try_from(pb: CommitIdPb) -> Result<Self, WireError> {
        Ok(CommitId::new(pb.version, hash_from_wire(&pb.hash)?))
    }
}

/// Encode a commit info record.
pub fn encode_commit_info(info: &CommitInfo) -> Vec<u8> {
    let pb = CommitInfoPb {
        version: info.version(),
        store_infos: info
            .store_infos()
            .iter()
            .map(|si| StoreInfoPb {
                name: si.name.clone(),
                commit_id: Some(si.commit_id.into()),
            })
            .collect(),
    };
    pb.encode_to_vec()
}

/// Decode a commit info record.
pub fn decode_commit_info(bytes: &[u8]) -> Result<CommitInfo, WireError> {
    let pb = CommitInfoPb::decode(bytes)?;
    let mut infos = Vec::with_capacity(pb.store_infos.len());
    for si in pb.store_infos {
        let commit_id = match si.commit_id {
            Some(id) => CommitId::try_from(id)?,
            None => CommitId::empty(),
        };
        infos.push(StoreInfo::new(si.name, commit_id));
    }
    Ok(CommitInfo::new(pb.version, infos))
}

/// Encode the latest-version marker.
pub fn encode_latest_version(version: i64) -> Vec<u8> {
    Int64ValuePb { value: version }.encode_to_vec()
}

/// Decode the latest-version marker.
pub fn decode_latest_version(bytes: &[u8]) -> Result<i64, WireError> {
    Ok(Int64ValuePb::decode(bytes)?.value)
}

/// Encode a Merkle proof into a `ProofOp.data` payload.
pub fn encode_merkle_proof(proof: &MerkleProof) -> Vec<u8> {
    let steps = proof
        .steps
        .iter()
        .map(|step| match step {
            ProofStep::Left(h) => ProofStepPb {
                left: true,
                sibling: h.to_bytes().to_vec(),
            },
            ProofStep::Right(h) => ProofStepPb {
                left: false,
                sibling: h.to_bytes().to_vec(),
            },
        })
        .collect();
    MerkleProofPb { steps }.encode_to_vec()
}

/// Decode a `ProofOp.data` payload back into a Merkle proof.
pub fn decode_merkle_proof(bytes: &[u8]) -> Result<MerkleProof, WireError> {
    let pb = MerkleProofPb::decode(bytes)?;
    let mut steps = Vec::with_capacity(pb.steps.len());
    for step in pb.steps {
        if step.sibling.len() != 32 {
            return Err(WireError::InvalidHashLength(step.sibling.len()));
        }
        let sibling = Hash::from_hash_bytes(&step.sibling);
        steps.push(if step.left {
            ProofStep::Left(sibling)
        } else {
            ProofStep::Right(sibling)
        });
    }
    Ok(MerkleProof { steps })
}

/// Encode subspace query results.
pub fn encode_pairs(pairs: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Vec<u8> {
    let pairs = pairs
        .into_iter()
        .map(|(key, value)| PairPb { key, value })
        .collect();
    PairsPb { pairs }.encode_to_vec()
}

/// Decode subspace query results.
pub fn decode_pairs(bytes: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, WireError> {
    let pb = PairsPb::decode(bytes)?;
    Ok(pb.pairs.into_iter().map(|p| (p.key, p.value)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_info_roundtrip() {
        let info = CommitInfo::new(
            7,
            vec![
                StoreInfo::new("bank", CommitId::new(7, Hash::from_bytes(b"bank"))),
                StoreInfo::new("acc", CommitId::empty()),
            ],
        );
        let decoded = decode_commit_info(&encode_commit_info(&info)).unwrap();
        assert_eq!(decoded, info);
        assert_eq!(decoded.hash(), info.hash());
    }

    #[test]
    fn test_empty_commit_id_serializes_without_hash_bytes() {
        let pb: CommitIdPb = CommitId::empty().into();
        assert!(pb.hash.is_empty());
        assert_eq!(CommitId::try_from(pb).unwrap(), CommitId::empty());
    }

    #[test]
    fn test_bad_hash_length_rejected() {
        let pb = CommitIdPb {
            version: 1,
            hash: vec![1, 2, 3],
        };
        assert!(matches!(
            CommitId::try_from(pb),
            Err(WireError::InvalidHashLength(3))
        ));
    }

    #[test]
    fn test_latest_version_roundtrip() {
        for v in [0i64, 1, 362_880, i64::MAX] {
            assert_eq!(decode_latest_version(&encode_latest_version(v)).unwrap(), v);
        }
    }

    #[test]
    fn test_merkle_proof_roundtrip() {
        let proof = MerkleProof {
            steps: vec![
                ProofStep::Left(Hash::from_bytes(b"l")),
                ProofStep::Right(Hash::from_bytes(b"r")),
            ],
        };
        let decoded = decode_merkle_proof(&encode_merkle_proof(&proof)).unwrap();
        assert_eq!(decoded, proof);
    }

    #[test]
    fn test_unknown_snapshot_record_decodes_to_none() {
        // A record with an unknown field tag (3) decodes with item == None.
        let mut buf = Vec::new();
        prost::encoding::encode_key(3, prost::encoding::WireType::LengthDelimited, &mut buf);
        prost::encoding::encode_varint(0, &mut buf);
        let item = SnapshotItemPb::decode(buf.as_slice()).unwrap();
        assert!(item.item.is_none());
    }

    #[test]
    fn test_pairs_roundtrip() {
        let pairs = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), Vec::new()),
        ];
        assert_eq!(decode_pairs(&encode_pairs(pairs.clone())).unwrap(), pairs);
    }
}
