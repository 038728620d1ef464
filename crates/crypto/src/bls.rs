//! BLS12-381 signatures for consensus.
//!
//! Reduction and agreement votes are BLS-signed so that a quorum's worth of
//! signatures over the same block hash can be folded into the single
//! aggregated signature carried by a certificate. We use the `min_pk`
//! instantiation: 48-byte compressed public keys (G1) and 96-byte compressed
//! signatures (G2).
//!
//! Encodings are validated for canonical form on deserialization to rule out
//! malleable points.

use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::{CryptoError, Result};

/// Domain separation tag for all Umbra consensus signatures.
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_UMBRA_CONSENSUS_";

/// Compressed public key length in bytes.
pub const PUBLIC_KEY_BYTES: usize = 48;
/// Compressed signature length in bytes.
pub const SIGNATURE_BYTES: usize = 96;

/// BLS secret key (32-byte scalar). Must be kept secret.
pub struct BlsSecretKey {
    inner: SecretKey,
}

impl BlsSecretKey {
    /// Generate a random secret key from the OS RNG.
    pub fn random() -> Self {
        let mut ikm = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut ikm);
        let sk = SecretKey::key_gen(&ikm, &[]).expect("32 bytes of IKM is always sufficient");
        Self { inner: sk }
    }

    /// Derive a secret key from input keying material (>= 32 bytes).
    pub fn from_seed(ikm: &[u8]) -> Result<Self> {
        if ikm.len() < 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: ikm.len(),
            });
        }
        let sk = SecretKey::key_gen(ikm, &[])
            .map_err(|e| CryptoError::InvalidSecretKey(format!("{:?}", e)))?;
        Ok(Self { inner: sk })
    }

    /// Reconstruct a secret key from its 32-byte big-endian scalar.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let sk = SecretKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidSecretKey(format!("{:?}", e)))?;
        Ok(Self { inner: sk })
    }

    /// Raw scalar bytes. Handle with care.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature {
            inner: self.inner.sign(message, DST, &[]),
        }
    }
}

impl Clone for BlsSecretKey {
    fn clone(&self) -> Self {
        Self::from_bytes(&self.to_bytes()).expect("round-trip of a valid key")
    }
}

impl std::fmt::Debug for BlsSecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlsSecretKey")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// BLS public key (48-byte compressed G1 point).
///
/// Implements `Ord` on the compressed encoding so aggregation inputs can be
/// ordered deterministically.
#[derive(Clone)]
pub struct BlsPublicKey {
    inner: PublicKey,
}

impl BlsPublicKey {
    /// Decode a compressed public key, rejecting non-canonical encodings.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_BYTES]) -> Result<Self> {
        let pk = PublicKey::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("{:?}", e)))?;
        if pk.to_bytes() != *bytes {
            return Err(CryptoError::InvalidPublicKey(
                "non-canonical encoding".into(),
            ));
        }
        Ok(Self { inner: pk })
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

    /// Compressed encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_BYTES] {
        self.inner.to_bytes()
    }

    /// Hex encoding of the compressed point.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Aggregate public keys into one. Fails on an empty input.
    pub fn aggregate(pubkeys: &[&BlsPublicKey]) -> Result<Self> {
        if pubkeys.is_empty() {
            return Err(CryptoError::Bls("cannot aggregate empty list".into()));
        }
        let pks: Vec<&PublicKey> = pubkeys.iter().map(|pk| &pk.inner).collect();
        let agg = AggregatePublicKey::aggregate(&pks, false)
            .map_err(|e| CryptoError::Bls(format!("aggregation failed: {:?}", e)))?;
        Ok(Self {
            inner: agg.to_public_key(),
        })
    }
}

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl PartialOrd for BlsPublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlsPublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl std::hash::Hash for BlsPublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl std::fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsPublicKey({})", self.to_hex())
    }
}

impl Serialize for BlsPublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let bytes = self.to_bytes();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(&bytes)
        }
    }
}

impl<'de> Deserialize<'de> for BlsPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
            BlsPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            BlsPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

/// BLS signature (96-byte compressed G2 point).
#[derive(Clone)]
pub struct BlsSignature {
    inner: Signature,
}

impl BlsSignature {
    /// Decode a compressed signature, rejecting non-canonical encodings.
    pub fn from_bytes(bytes: &[u8; SIGNATURE_BYTES]) -> Result<Self> {
        let sig = Signature::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidSignature(format!("{:?}", e)))?;
        if sig.to_bytes() != *bytes {
            return Err(CryptoError::InvalidSignature(
                "non-canonical encoding".into(),
            ));
        }
        Ok(Self { inner: sig })
    }

    /// Decode from an arbitrary slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; SIGNATURE_BYTES] =
            bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                expected: SIGNATURE_BYTES,
                actual: bytes.len(),
            })?;
        Self::from_bytes(&arr)
    }

    /// Compressed encoding.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_BYTES] {
        self.inner.to_bytes()
    }

    /// Verify against a single public key.
    pub fn verify(&self, message: &[u8], public_key: &BlsPublicKey) -> bool {
        self.inner
            .verify(true, message, DST, &[], &public_key.inner, true)
            == BLST_ERROR::BLST_SUCCESS
    }

    /// Aggregate signatures over the same message into one.
    pub fn aggregate(signatures: &[&BlsSignature]) -> Result<Self> {
        if signatures.is_empty() {
            return Err(CryptoError::Bls("cannot aggregate empty list".into()));
        }
        let sigs: Vec<&Signature> = signatures.iter().map(|s| &s.inner).collect();
        let agg = AggregateSignature::aggregate(&sigs, false)
            .map_err(|e| CryptoError::Bls(format!("aggregation failed: {:?}", e)))?;
        Ok(Self {
            inner: agg.to_signature(),
        })
    }

    /// Verify an aggregated signature: all listed keys must have signed the
    /// same message.
    pub fn verify_aggregate(&self, message: &[u8], public_keys: &[&BlsPublicKey]) -> bool {
        if public_keys.is_empty() {
            return false;
        }
        let pks: Vec<&PublicKey> = public_keys.iter().map(|pk| &pk.inner).collect();
        self.inner.fast_aggregate_verify(true, message, DST, &pks) == BLST_ERROR::BLST_SUCCESS
    }
}

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl std::fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlsSignature({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for BlsSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let bytes = self.to_bytes();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            serializer.serialize_bytes(&bytes)
        }
    }
}

impl<'de> Deserialize<'de> for BlsSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
            BlsSignature::from_slice(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            BlsSignature::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

/// Verify an aggregated signature given raw 48-byte key encodings.
///
/// Convenience for certificate checks, where keys arrive as wire bytes.
pub fn verify_aggregate_raw(
    pubkeys: &[[u8; PUBLIC_KEY_BYTES]],
    message: &[u8],
    signature: &[u8; SIGNATURE_BYTES],
) -> bool {
    let sig = match BlsSignature::from_bytes(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let keys: Result<Vec<BlsPublicKey>> = pubkeys.iter().map(BlsPublicKey::from_bytes).collect();
    let keys = match keys {
        Ok(k) => k,
        Err(_) => return false,
    };
    let refs: Vec<&BlsPublicKey> = keys.iter().collect();
    sig.verify_aggregate(message, &refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let sk = BlsSecretKey::from_seed(&[7u8; 32]).unwrap();
        let pk = sk.public_key();
        let sig = sk.sign(b"block hash");
        assert!(sig.verify(b"block hash", &pk));
        assert!(!sig.verify(b"other hash", &pk));
    }

    #[test]
    fn aggregate_verifies_against_aggregated_keys() {
        let message = b"winning hash";
        let keys: Vec<BlsSecretKey> = (0u8..4)
            .map(|i| BlsSecretKey::from_seed(&[i + 1; 32]).unwrap())
            .collect();
        let pks: Vec<BlsPublicKey> = keys.iter().map(|k| k.public_key()).collect();
        let sigs: Vec<BlsSignature> = keys.iter().map(|k| k.sign(message)).collect();

        let sig_refs: Vec<&BlsSignature> = sigs.iter().collect();
        let agg = BlsSignature::aggregate(&sig_refs).unwrap();

        let pk_refs: Vec<&BlsPublicKey> = pks.iter().collect();
        assert!(agg.verify_aggregate(message, &pk_refs));
    }

    #[test]
    fn corrupted_contribution_rejected() {
        let message = b"winning hash";
        let keys: Vec<BlsSecretKey> = (0u8..3)
            .map(|i| BlsSecretKey::from_seed(&[i + 1; 32]).unwrap())
            .collect();
        let pks: Vec<BlsPublicKey> = keys.iter().map(|k| k.public_key()).collect();
        let mut sigs: Vec<BlsSignature> = keys.iter().map(|k| k.sign(message)).collect();

        // Replace one contribution with a signature over a different message.
        sigs[1] = keys[1].sign(b"forged");

        let sig_refs: Vec<&BlsSignature> = sigs.iter().collect();
        let agg = BlsSignature::aggregate(&sig_refs).unwrap();
        let pk_refs: Vec<&BlsPublicKey> = pks.iter().collect();
        assert!(!agg.verify_aggregate(message, &pk_refs));
    }

    #[test]
    fn canonical_encoding_round_trip() {
        let sk = BlsSecretKey::from_seed(&[9u8; 32]).unwrap();
        let pk = sk.public_key();
        let decoded = BlsPublicKey::from_bytes(&pk.to_bytes()).unwrap();
        assert_eq!(pk, decoded);

        let sig = sk.sign(b"msg");
        let decoded = BlsSignature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(sig, decoded);
    }
}
