//! Consensus key material.
//!
//! A provisioner signs with two keys: BLS over block hashes (aggregatable
//! into certificates) and Ed25519 over message envelopes.

use crate::bls::{BlsPublicKey, BlsSecretKey};
use crate::ed25519::{EdKeypair, EdPublicKey};
use crate::Result;

/// The combined key pair a node uses in consensus.
#[derive(Clone)]
pub struct NodeKeys {
    /// BLS secret key
    pub bls_secret: BlsSecretKey,
    /// BLS public key (committee identity)
    pub bls_public: BlsPublicKey,
    /// Ed25519 key pair (envelope identity)
    pub ed: EdKeypair,
}

impl NodeKeys {
    /// Generate a fresh random key set.
    pub fn random() -> Self {
        let bls_secret = BlsSecretKey::random();
        let bls_public = bls_secret.public_key();
        Self {
            bls_secret,
            bls_public,
            ed: EdKeypair::random(),
        }
    }

    /// Derive the full key set from a single 32-byte seed.
    ///
    /// Deterministic, used by tests and by `--genesis legacy` fixtures.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let bls_secret = BlsSecretKey::from_seed(seed)?;
        let bls_public = bls_secret.public_key();
        Ok(Self {
            bls_secret,
            bls_public,
            ed: EdKeypair::from_seed(seed),
        })
    }

    /// Ed25519 public key.
    pub fn ed_public(&self) -> EdPublicKey {
        self.ed.public_key()
    }
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeys")
            .field("bls_public", &self.bls_public)
            .field("ed_public", &self.ed_public())
            .finish()
    }
}
