//! Block and header types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::certificate::Certificate;
use crate::hash::Hash;
use crate::keys::PublicKeyBytes;
use crate::merkle::merkle_root;
use crate::transaction::ContractCall;
use crate::{Error, Result};

/// Current block format version.
pub const BLOCK_VERSION: u8 = 0;

/// Length of a round seed (a compressed BLS signature over the prior seed).
pub const SEED_BYTES: usize = 96;

/// Per-round seed, derived by BLS-signing the previous round's seed.
///
/// Feeds sortition and score generation.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Seed(pub [u8; SEED_BYTES]);

impl Seed {
    /// The zero seed used at genesis.
    pub const ZERO: Seed = Seed([0u8; SEED_BYTES]);

    /// Construct from a slice, failing on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SEED_BYTES] = bytes.try_into().map_err(|_| Error::InvalidLength {
            expected: SEED_BYTES,
            actual: bytes.len(),
        })?;
        Ok(Seed(arr))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; SEED_BYTES] {
        &self.0
    }
}

impl Default for Seed {
    fn default() -> Self {
        Seed::ZERO
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Seed {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        Seed::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// A block header.
///
/// The block hash is the Sha3-256 content hash of the header with the
/// certificate zeroed, so the hash is fixed before agreement completes and
/// the certificate can be attached afterwards without changing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block format version
    pub version: u8,
    /// Height in the chain (genesis is 0)
    pub height: u64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Round seed
    pub seed: Seed,
    /// Merkle root of the contract calls
    pub tx_root: Hash,
    /// State root after the oracle applied this block
    pub state_root: Hash,
    /// BLS key of the block generator
    pub generator: PublicKeyBytes,
    /// Quorum certificate; zeroed until agreement completes
    pub certificate: Certificate,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            version: BLOCK_VERSION,
            height: 0,
            timestamp: 0,
            prev_hash: Hash::NIL,
            seed: Seed::ZERO,
            tx_root: Hash::NIL,
            state_root: Hash::NIL,
            generator: PublicKeyBytes::ZERO,
            certificate: Certificate::default(),
        }
    }
}

impl BlockHeader {
    /// Content hash of the header with the certificate zeroed.
    pub fn hash(&self) -> Hash {
        Hash::sha3(&self.hashable_bytes())
    }

    /// The bytes the block hash commits to. The certificate is excluded.
    pub fn hashable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 8 + 8 + 32 + SEED_BYTES + 32 + 32 + 48);
        out.push(self.version);
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(self.prev_hash.as_bytes());
        out.extend_from_slice(self.seed.as_bytes());
        out.extend_from_slice(self.tx_root.as_bytes());
        out.extend_from_slice(self.state_root.as_bytes());
        out.extend_from_slice(self.generator.as_bytes());
        out
    }

    /// Structural checks against the parent header.
    pub fn validate_against(&self, parent: &BlockHeader) -> Result<()> {
        if self.version != parent.version {
            return Err(Error::InvalidHeader(format!(
                "version {} does not match chain version {}",
                self.version, parent.version
            )));
        }
        if self.height != parent.height + 1 {
            return Err(Error::InvalidHeader(format!(
                "height {} does not follow tip height {}",
                self.height, parent.height
            )));
        }
        if self.prev_hash != parent.hash() {
            return Err(Error::InvalidHeader("prev_hash does not match tip".into()));
        }
        if self.timestamp <= parent.timestamp {
            return Err(Error::InvalidHeader(format!(
                "timestamp {} not after tip timestamp {}",
                self.timestamp, parent.timestamp
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {:?}, prev: {:?})",
            self.height,
            self.hash(),
            self.prev_hash
        )
    }
}

/// A complete block: header plus ordered contract calls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    /// The block header
    pub header: BlockHeader,
    /// The contract calls in this block
    pub txs: Vec<ContractCall>,
}

impl Block {
    /// Assemble a block and fill in its transaction root.
    pub fn new(mut header: BlockHeader, txs: Vec<ContractCall>) -> Self {
        header.tx_root = merkle_root(&txs.iter().map(|t| t.hash()).collect::<Vec<_>>());
        Self { header, txs }
    }

    /// The canonical zero-transaction block over `parent`.
    ///
    /// Deterministic across nodes: the timestamp is pinned to
    /// `parent.timestamp + 1` and the seed is inherited, so every node
    /// derives the same empty-block hash for the tie-break.
    pub fn empty(parent: &BlockHeader) -> Self {
        let header = BlockHeader {
            version: parent.version,
            height: parent.height + 1,
            timestamp: parent.timestamp + 1,
            prev_hash: parent.hash(),
            seed: parent.seed,
            tx_root: Hash::NIL,
            state_root: parent.state_root,
            generator: PublicKeyBytes::ZERO,
            certificate: Certificate::default(),
        };
        Self {
            header,
            txs: Vec::new(),
        }
    }

    /// The block hash (hash of the header, certificate zeroed).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Merkle root over the contained call hashes.
    pub fn compute_tx_root(&self) -> Hash {
        merkle_root(&self.txs.iter().map(|t| t.hash()).collect::<Vec<_>>())
    }

    /// Whether the header's root matches the body.
    pub fn validate_tx_root(&self) -> bool {
        self.header.tx_root == self.compute_tx_root()
    }

    /// Canonical binary encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from the canonical binary encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} (hash: {:?}, {} calls)",
            self.header.height,
            self.hash(),
            self.txs.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::BlsSignatureBytes;

    #[test]
    fn hash_ignores_certificate() {
        let mut header = BlockHeader {
            height: 5,
            timestamp: 100,
            ..Default::default()
        };
        let bare = header.hash();

        header.certificate = Certificate {
            step: 3,
            signature: BlsSignatureBytes([1u8; 96]),
            keys: vec![PublicKeyBytes([2u8; 48])],
            ..Default::default()
        };
        assert_eq!(header.hash(), bare);
    }

    #[test]
    fn empty_block_is_deterministic() {
        let parent = BlockHeader {
            height: 7,
            timestamp: 1000,
            ..Default::default()
        };
        let a = Block::empty(&parent);
        let b = Block::empty(&parent);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.header.height, 8);
        assert_eq!(a.header.timestamp, 1001);
        assert!(a.txs.is_empty());
    }

    #[test]
    fn validate_against_parent() {
        let parent = BlockHeader {
            height: 3,
            timestamp: 30,
            ..Default::default()
        };
        let good = BlockHeader {
            height: 4,
            timestamp: 31,
            prev_hash: parent.hash(),
            ..Default::default()
        };
        assert!(good.validate_against(&parent).is_ok());

        let bad_height = BlockHeader {
            height: 6,
            ..good.clone()
        };
        assert!(bad_height.validate_against(&parent).is_err());

        let bad_time = BlockHeader {
            timestamp: 30,
            ..good.clone()
        };
        assert!(bad_time.validate_against(&parent).is_err());

        let bad_prev = BlockHeader {
            prev_hash: Hash::sha3(b"other"),
            ..good
        };
        assert!(bad_prev.validate_against(&parent).is_err());
    }
}
