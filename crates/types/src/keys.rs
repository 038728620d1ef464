//! Wire-form key and signature bytes.
//!
//! The data model deliberately stores keys and aggregated signatures as raw
//! compressed bytes; point decompression and verification happen at the
//! crypto seam, not in every struct that carries an identity.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Compressed BLS public key length.
pub const PUBLIC_KEY_BYTES: usize = 48;
/// Compressed BLS signature length.
pub const BLS_SIGNATURE_BYTES: usize = 96;
/// Ed25519 signature length.
pub const ED_SIGNATURE_BYTES: usize = 64;

/// A provisioner's BLS public key in compressed wire form (48 bytes).
///
/// Orders on the byte encoding, which gives the provisioner set and
/// committee iteration a deterministic order across nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKeyBytes(pub [u8; PUBLIC_KEY_BYTES]);

impl PublicKeyBytes {
    /// The zero key, used by headers that carry no generator (empty block).
    pub const ZERO: PublicKeyBytes = PublicKeyBytes([0u8; PUBLIC_KEY_BYTES]);

    /// Construct from a slice, failing on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_BYTES] =
            bytes.try_into().map_err(|_| Error::InvalidLength {
                expected: PUBLIC_KEY_BYTES,
                actual: bytes.len(),
            })?;
        Ok(PublicKeyBytes(arr))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        &self.0
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for PublicKeyBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for PublicKeyBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        PublicKeyBytes::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// An aggregated BLS signature in compressed wire form (96 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsSignatureBytes(pub [u8; BLS_SIGNATURE_BYTES]);

impl BlsSignatureBytes {
    /// The zero signature carried by zeroed certificates.
    pub const ZERO: BlsSignatureBytes = BlsSignatureBytes([0u8; BLS_SIGNATURE_BYTES]);

    /// Construct from a slice, failing on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; BLS_SIGNATURE_BYTES] =
            bytes.try_into().map_err(|_| Error::InvalidLength {
                expected: BLS_SIGNATURE_BYTES,
                actual: bytes.len(),
            })?;
        Ok(BlsSignatureBytes(arr))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; BLS_SIGNATURE_BYTES] {
        &self.0
    }
}

impl Default for BlsSignatureBytes {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for BlsSignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignatureBytes({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for BlsSignatureBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for BlsSignatureBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        BlsSignatureBytes::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

/// An Ed25519 envelope signature in wire form (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EdSignatureBytes(pub [u8; ED_SIGNATURE_BYTES]);

impl EdSignatureBytes {
    /// The zero signature used by unsigned message scaffolding.
    pub const ZERO: EdSignatureBytes = EdSignatureBytes([0u8; ED_SIGNATURE_BYTES]);

    /// Construct from a slice, failing on length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ED_SIGNATURE_BYTES] =
            bytes.try_into().map_err(|_| Error::InvalidLength {
                expected: ED_SIGNATURE_BYTES,
                actual: bytes.len(),
            })?;
        Ok(EdSignatureBytes(arr))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; ED_SIGNATURE_BYTES] {
        &self.0
    }
}

impl Default for EdSignatureBytes {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for EdSignatureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdSignatureBytes({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for EdSignatureBytes {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for EdSignatureBytes {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            hex::decode(s).map_err(serde::de::Error::custom)?
        } else {
            <Vec<u8>>::deserialize(deserializer)?
        };
        EdSignatureBytes::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}
