//! Cryptographic hash type and binary Merkle aggregation using Blake3.

use std::fmt;

/// A 32-byte cryptographic hash using Blake3.
///
/// Safe to use as a map key; all hashing operations are deterministic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Size of hash in bytes.
    pub const BYTES: usize = 32;

    /// Zero hash (all bytes are 0x00).
    ///
    /// Used as the root of an empty aggregation and as the hash of an empty
    /// commit id.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create hash from bytes using Blake3.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self(*hash.as_bytes())
    }

    /// Create a Hash from raw hash bytes (without hashing).
    ///
    /// # Panics
    ///
    /// Panics if bytes length is not exactly 32.
    pub fn from_hash_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), 32, "Hash must be exactly 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Self(arr)
    }

    /// Create hash from multiple byte slices.
    ///
    /// Equivalent to hashing the concatenation of `parts` without allocating
    /// the concatenated buffer.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Parse hash from hex string.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        if hex.len() != 64 {
            return Err(HexError::InvalidLength {
                expected: 64,
                actual: hex.len(),
            });
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| HexError::InvalidHex)?;

        Ok(Self(bytes))
    }

    /// Convert hash to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to bytes array.
    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for Hash {
    fn default() -> Self {
        Hash::ZERO
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Hash({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Errors that can occur when parsing hex strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    /// Invalid hex string length.
    #[error("Invalid hex length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Invalid hex characters.
    #[error("Invalid hex string")]
    InvalidHex,
}

/// Compute a binary merkle root from a list of hashes.
///
/// Uses Blake3 to combine sibling pairs at each level. For odd-length levels,
/// the last hash is promoted unchanged to the next level.
///
/// Returns `Hash::ZERO` for an empty list.
///
/// # Algorithm
///
/// ```text
/// Level 0 (leaves): [H0, H1, H2, H3, H4]
/// Level 1:          [hash(H0||H1), hash(H2||H3), H4]
/// Level 2:          [hash(L1_0||L1_1), H4]
/// Level 3 (root):   [hash(L2_0||L2_1)]
/// ```
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = hashes.to_vec();

    while level.len() > 1 {
        level = next_level(&level);
    }

    level[0]
}

/// One step of a merkle inclusion proof: the sibling hash and which side of
/// the running hash it sits on. Odd-node promotions produce no step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofStep {
    /// Sibling is the left input of the combiner.
    Left(Hash),
    /// Sibling is the right input of the combiner.
    Right(Hash),
}

/// An inclusion proof for one leaf against a root built by
/// [`compute_merkle_root`].
///
/// Replaying the steps from the leaf hash reproduces the root. The proof is
/// produced by the stores and carried opaquely; replay exists for test
/// tooling and external verifiers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MerkleProof {
    /// Bottom-up sibling steps.
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    /// Replay the proof from a leaf hash, returning the implied root.
    pub fn root_from(&self, leaf: Hash) -> Hash {
        let mut acc = leaf;
        for step in &self.steps {
            acc = match step {
                ProofStep::Left(sibling) => Hash::from_parts(&[sibling.as_bytes(), acc.as_bytes()]),
                ProofStep::Right(sibling) => {
                    Hash::from_parts(&[acc.as_bytes(), sibling.as_bytes()])
                }
            };
        }
        acc
    }
}

/// Produce the inclusion proof for `leaves[index]` against
/// `compute_merkle_root(leaves)`.
///
/// Returns `None` if `index` is out of range.
pub fn prove_merkle(leaves: &[Hash], index: usize) -> Option<MerkleProof> {
    if index >= leaves.len() {
        return None;
    }

    let mut steps = Vec::new();
    let mut level: Vec<Hash> = leaves.to_vec();
    let mut idx = index;

    while level.len() > 1 {
        let sibling = idx ^ 1;
        if sibling < level.len() {
            if sibling < idx {
                steps.push(ProofStep::Left(level[sibling]));
            } else {
                steps.push(ProofStep::Right(level[sibling]));
            }
        }
        // else: odd node promotes up unchanged, no step recorded

        level = next_level(&level);
        idx /= 2;
    }

    Some(MerkleProof { steps })
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    for chunk in level.chunks(2) {
        let hash = if chunk.len() == 2 {
            Hash::from_parts(&[chunk[0].as_bytes(), chunk[1].as_bytes()])
        } else {
            // Odd node promotes up unchanged
            chunk[0]
        };
        next.push(hash);
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"hello world";
        let hash1 = Hash::from_bytes(data);
        let hash2 = Hash::from_bytes(data);
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_from_parts_matches_concatenation() {
        let joined = Hash::from_bytes(b"leftright");
        let parts = Hash::from_parts(&[b"left", b"right"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_hex_roundtrip() {
        let original = Hash::from_bytes(b"test data");
        let hex = original.to_hex();
        assert_eq!(hex.len(), 64);

        let parsed = Hash::from_hex(&hex).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_is_zero() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::from_bytes(b"test").is_zero());
    }

    #[test]
    fn test_merkle_root_empty() {
        assert_eq!(compute_merkle_root(&[]), Hash::ZERO);
    }

    #[test]
    fn test_merkle_root_single() {
        let h = Hash::from_bytes(b"single");
        assert_eq!(compute_merkle_root(&[h]), h);
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let h0 = Hash::from_bytes(b"a");
        let h1 = Hash::from_bytes(b"b");
        let root_ab = compute_merkle_root(&[h0, h1]);
        let root_ba = compute_merkle_root(&[h1, h0]);
        assert_ne!(root_ab, root_ba);
    }

    #[test]
    fn test_merkle_root_odd_count() {
        // With 3 hashes: hash(hash(h0||h1) || h2)
        let h0 = Hash::from_bytes(b"0");
        let h1 = Hash::from_bytes(b"1");
        let h2 = Hash::from_bytes(b"2");

        let level1_left = Hash::from_parts(&[h0.as_bytes(), h1.as_bytes()]);
        // h2 promotes up unchanged
        let expected = Hash::from_parts(&[level1_left.as_bytes(), h2.as_bytes()]);

        assert_eq!(compute_merkle_root(&[h0, h1, h2]), expected);
    }

    #[test]
    fn test_proof_roundtrip_all_indices() {
        for n in 1..=9usize {
            let leaves: Vec<Hash> = (0..n).map(|i| Hash::from_bytes(&[i as u8])).collect();
            let root = compute_merkle_root(&leaves);
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = prove_merkle(&leaves, i).unwrap();
                assert_eq!(proof.root_from(*leaf), root, "n={n} i={i}");
            }
        }
    }

    #[test]
    fn test_proof_rejects_wrong_leaf() {
        let leaves: Vec<Hash> = (0..5u8).map(|i| Hash::from_bytes(&[i])).collect();
        let root = compute_merkle_root(&leaves);
        let proof = prove_merkle(&leaves, 2).unwrap();
        assert_ne!(proof.root_from(Hash::from_bytes(b"forged")), root);
    }

    #[test]
    fn test_proof_index_out_of_range() {
        let leaves = vec![Hash::from_bytes(b"only")];
        assert!(prove_merkle(&leaves, 1).is_none());
    }
}
