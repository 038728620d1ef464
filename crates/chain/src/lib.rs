//! # Umbra Chain
//!
//! The accepted chain and its gatekeeper:
//!
//! - [`registry`] - the shared view of tip, provisioners, bids and
//!   candidates; readers take the read lock, the acceptor holds the sole
//!   typed write handle
//! - [`acceptor`] - verifies certificates and headers, persists blocks,
//!   advances the tip and produces round updates
//! - [`genesis`] - the built-in genesis blocks (`legacy` and `new`)

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod acceptor;
pub mod genesis;
pub mod registry;

pub use acceptor::Acceptor;
pub use genesis::{genesis_block, GenesisKind};
pub use registry::{Registry, RegistryWriter};

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors surfaced by block acceptance.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A block is already accepted at this height or hash
    #[error("block already exists")]
    BlockExists,

    /// Header fails structural validation against the tip
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The certificate does not prove quorum consent
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The block body is malformed (root mismatch, coinbase rules)
    #[error("invalid body: {0}")]
    InvalidBody(String),

    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] umbra_storage::StorageError),

    /// Oracle failure during state transition
    #[error(transparent)]
    Oracle(#[from] umbra_oracle::OracleError),
}
