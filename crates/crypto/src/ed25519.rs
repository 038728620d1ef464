//! Ed25519 signatures for message envelopes.
//!
//! Every gossiped consensus message carries an Ed25519 signature over its
//! envelope in addition to the inner BLS signature over the block hash; the
//! envelope binds sender identity, round, step and chain position.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{CryptoError, Result};

/// Public key length in bytes.
pub const PUBLIC_KEY_BYTES: usize = 32;
/// Signature length in bytes.
pub const SIGNATURE_BYTES: usize = 64;

/// Ed25519 signing key pair.
#[derive(Clone)]
pub struct EdKeypair {
    signing: SigningKey,
}

impl EdKeypair {
    /// Generate a key pair from the OS RNG.
    pub fn random() -> Self {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Derive a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// The public half.
    pub fn public_key(&self) -> EdPublicKey {
        EdPublicKey {
            inner: self.signing.verifying_key(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> EdSignature {
        EdSignature {
            inner: self.signing.sign(message),
        }
    }
}

impl std::fmt::Debug for EdKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdKeypair")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// Ed25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EdPublicKey {
    inner: VerifyingKey,
}

impl EdPublicKey {
    /// Decode a public key from its 32-byte encoding.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_BYTES]) -> Result<Self> {
        let inner = VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::Ed25519(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Decode from an arbitrary slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_BYTES] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: PUBLIC_KEY_BYTES,
                actual: bytes.len(),
            })?;
        Self::from_bytes(&arr)
    }

    /// Raw encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_BYTES] {
        self.inner.to_bytes()
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &EdSignature) -> bool {
        self.inner.verify(message, &signature.inner).is_ok()
    }
}

impl std::fmt::Debug for EdPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EdPublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for EdPublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let bytes = self.to_bytes();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(&bytes)
        }
    }
}

impl<'de> Deserialize<'de> for EdPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
            EdPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            EdPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EdSignature {
    inner: Signature,
}

impl EdSignature {
    /// Decode a signature from its 64-byte encoding.
    pub fn from_bytes(bytes: &[u8; SIGNATURE_BYTES]) -> Self {
        Self {
            inner: Signature::from_bytes(bytes),
        }
    }

    /// Decode from an arbitrary slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SIGNATURE_BYTES] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: SIGNATURE_BYTES,
                actual: bytes.len(),
            })?;
        Ok(Self::from_bytes(&arr))
    }

    /// Raw encoding.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_BYTES] {
        self.inner.to_bytes()
    }
}

impl std::fmt::Debug for EdSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EdSignature({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for EdSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let bytes = self.to_bytes();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(&bytes)
        }
    }
}

impl<'de> Deserialize<'de> for EdSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
            EdSignature::from_slice(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            EdSignature::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}
