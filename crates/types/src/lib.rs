//! # Umbra Types
//!
//! Core type definitions for the Umbra blockchain:
//! - [`Hash`] - 32-byte Sha3-256 content hashes
//! - [`Block`] and [`BlockHeader`] - block structures
//! - [`ContractCall`] - the transaction union (transfers, stakes, bids, ...)
//! - [`Certificate`] - aggregated proof of quorum consent on a block
//! - [`Provisioner`] / [`Provisioners`] - the stake table committees are
//!   drawn from
//! - [`Bid`] / [`BidList`] - blind-bid commitments for block generation
//!
//! ## Example
//!
//! ```rust
//! use umbra_types::{Block, BlockHeader, Hash};
//!
//! let genesis = BlockHeader::default();
//! let block = Block::empty(&genesis);
//! assert_eq!(block.header.height, 1);
//! assert_eq!(block.header.prev_hash, genesis.hash());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod block;
pub mod certificate;
pub mod hash;
pub mod keys;
pub mod merkle;
pub mod provisioner;
pub mod transaction;

pub use block::{Block, BlockHeader, Seed, BLOCK_VERSION};
pub use certificate::Certificate;
pub use hash::Hash;
pub use keys::{BlsSignatureBytes, EdSignatureBytes, PublicKeyBytes};
pub use merkle::{merkle_root, MerkleTree};
pub use provisioner::{Bid, BidList, Provisioner, Provisioners, Stake};
pub use transaction::{CallType, ContractCall};

/// Result type alias for type-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Umbra types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Binary encoding or decoding failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Malformed certificate bytes
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Malformed header
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
