//! # Umbra Storage
//!
//! The persistent block and transaction store, a transactional key-value
//! layout over RocksDB:
//!
//! | key | value |
//! |---|---|
//! | `blocks` CF: block hash | encoded block |
//! | `heights` CF: height (u64 BE) | block hash |
//! | `transactions` CF: tx hash | (block hash, index) |
//! | `metadata` CF: `tip` | block hash |
//! | `bids` CF: bid commitment | (d, k, index, end height) |
//!
//! Writes go through atomic batches; the acceptor is the only writer.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod db;

pub use db::{Database, DatabaseConfig, StoredBid, TxLocation};

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors produced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Underlying database failure
    #[error("database error: {0}")]
    Database(String),

    /// A required column family is missing
    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),

    /// Stored bytes failed to decode
    #[error("corrupt entry for key {key}: {reason}")]
    Corrupt {
        /// Hex of the offending key
        key: String,
        /// What failed
        reason: String,
    },

    /// The block is already stored
    #[error("block already exists")]
    BlockExists,

    /// Codec failure while encoding a value
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Codec(e.to_string())
    }
}
