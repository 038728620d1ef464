//! # Umbra Crypto
//!
//! Cryptographic primitives for the Umbra node:
//! - [`bls`] - BLS12-381 signatures with aggregation (consensus votes and
//!   certificates)
//! - [`ed25519`] - Ed25519 signatures (message envelopes, peer identity)
//! - [`hash`] - Sha3-256 / Blake2b-256 digests and the 4-byte frame checksum
//! - [`keys`] - the combined consensus key pair carried by a provisioner
//!
//! The range-proof and blind-bid circuits themselves live behind the oracle
//! boundary; this crate only covers what the node verifies locally.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod bls;
pub mod ed25519;
pub mod hash;
pub mod keys;

pub use keys::NodeKeys;

/// Result type alias for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid length for a fixed-size input
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid BLS secret key material
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// Invalid BLS public key encoding
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature encoding
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// BLS aggregation failure
    #[error("bls error: {0}")]
    Bls(String),

    /// Ed25519 failure
    #[error("ed25519 error: {0}")]
    Ed25519(String),

    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
