//! # Umbra Mempool
//!
//! Storage for transactions that are valid against the current chain state
//! and can be included in the next block:
//!
//! - [`Pool`] - the verified-entry map with fee-ordered views
//! - [`Mempool`] - the owner task servicing bus requests, evicting on
//!   accepted blocks and re-propagating verified transactions
//!
//! The pool map sits behind a reader-writer lock so sort views and balance
//! queries take the read side; the owner task is the only writer.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod pool;
pub mod service;

pub use pool::{Pool, TxDesc};
pub use service::{Mempool, MempoolConfig};

/// Result type alias for mempool operations.
pub type Result<T> = std::result::Result<T, MempoolError>;

/// Errors returned to transaction submitters.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// Coinbase transactions are built by the block generator only
    #[error("coinbase tx not allowed")]
    CoinbaseNotAllowed,

    /// A transaction with the same hash is already pooled
    #[error("already exists")]
    AlreadyExists,

    /// The oracle rejected the transaction
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The oracle was unreachable; the submitter may retry
    #[error("verification unavailable: {0}")]
    OracleUnavailable(String),
}

impl From<umbra_oracle::OracleError> for MempoolError {
    fn from(e: umbra_oracle::OracleError) -> Self {
        if e.is_transient() {
            MempoolError::OracleUnavailable(e.to_string())
        } else {
            MempoolError::VerificationFailed(e.to_string())
        }
    }
}
