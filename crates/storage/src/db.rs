//! RocksDB wrapper with column families for chain data.

use parking_lot::RwLock;
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options, WriteBatch};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use umbra_types::{Block, Hash};

use crate::{Result, StorageError};

/// Column family names.
pub mod cf {
    /// Blocks by hash
    pub const BLOCKS: &str = "blocks";
    /// Block hash by height
    pub const HEIGHTS: &str = "heights";
    /// (block hash, index) by tx hash
    pub const TRANSACTIONS: &str = "transactions";
    /// Chain metadata (tip)
    pub const METADATA: &str = "metadata";
    /// Stored bid values
    pub const BIDS: &str = "bids";

    /// All column families.
    pub const ALL: &[&str] = &[BLOCKS, HEIGHTS, TRANSACTIONS, METADATA, BIDS];
}

const TIP_KEY: &[u8] = b"tip";

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Enable LZ4 compression
    pub enable_compression: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

/// Location of a transaction inside the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    /// Hash of the containing block
    pub block_hash: Hash,
    /// Index of the call within the block
    pub index: u32,
}

/// A bid's persisted opening values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBid {
    /// Bid value commitment `d`
    pub d: Hash,
    /// Bid secret `k`
    pub k: Hash,
    /// Index in the bid list
    pub index: u64,
    /// Expiry height
    pub end_height: u64,
}

/// The chain store.
///
/// Reads may run concurrently; block writes are serialized by the acceptor
/// through [`Database::store_block`], which commits one atomic batch.
pub struct Database {
    inner: DBWithThreadMode<MultiThreaded>,
    // Serializes store_block against concurrent tip reads.
    write_lock: RwLock<()>,
}

impl Database {
    /// Open or create the database at `path`.
    pub fn open(path: &Path, config: DatabaseConfig) -> Result<Self> {
        info!(path = %path.display(), "opening chain database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf::ALL
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if config.enable_compression {
                    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let inner = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            path,
            cf_descriptors,
        )?;

        Ok(Self {
            inner,
            write_lock: RwLock::new(()),
        })
    }

    fn cf(&self, name: &'static str) -> Result<std::sync::Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.inner
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    /// Persist a block with its transaction indices and advance the tip,
    /// all in one batch.
    ///
    /// Fails with [`StorageError::BlockExists`] if a block with the same
    /// hash or height is already stored; the first certificate for a height
    /// wins.
    pub fn store_block(&self, block: &Block) -> Result<()> {
        let _guard = self.write_lock.write();

        let hash = block.hash();
        let height = block.height();

        if self.block_exists(&hash)? {
            return Err(StorageError::BlockExists);
        }
        if self.hash_by_height(height)?.is_some() {
            return Err(StorageError::BlockExists);
        }

        let mut batch = WriteBatch::default();
        let blocks = self.cf(cf::BLOCKS)?;
        let heights = self.cf(cf::HEIGHTS)?;
        let txs = self.cf(cf::TRANSACTIONS)?;
        let meta = self.cf(cf::METADATA)?;

        batch.put_cf(&blocks, hash.as_bytes(), bincode::serialize(block)?);
        batch.put_cf(&heights, height.to_be_bytes(), hash.as_bytes());
        for (index, tx) in block.txs.iter().enumerate() {
            let location = TxLocation {
                block_hash: hash,
                index: index as u32,
            };
            batch.put_cf(&txs, tx.hash().as_bytes(), bincode::serialize(&location)?);
        }
        batch.put_cf(&meta, TIP_KEY, hash.as_bytes());

        self.inner.write(batch)?;
        debug!(height, hash = %hash, txs = block.txs.len(), "block persisted");
        Ok(())
    }

    /// Whether a block with this hash is stored.
    pub fn block_exists(&self, hash: &Hash) -> Result<bool> {
        let blocks = self.cf(cf::BLOCKS)?;
        Ok(self.inner.get_cf(&blocks, hash.as_bytes())?.is_some())
    }

    /// Fetch a block by hash.
    pub fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>> {
        let blocks = self.cf(cf::BLOCKS)?;
        match self.inner.get_cf(&blocks, hash.as_bytes())? {
            None => Ok(None),
            Some(bytes) => {
                let block = bincode::deserialize(&bytes).map_err(|e| StorageError::Corrupt {
                    key: hash.to_hex(),
                    reason: e.to_string(),
                })?;
                Ok(Some(block))
            }
        }
    }

    /// The block hash stored for a height.
    pub fn hash_by_height(&self, height: u64) -> Result<Option<Hash>> {
        let heights = self.cf(cf::HEIGHTS)?;
        match self.inner.get_cf(&heights, height.to_be_bytes())? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Hash::from_slice(&bytes).map_err(|e| {
                StorageError::Corrupt {
                    key: format!("height:{}", height),
                    reason: e.to_string(),
                }
            })?)),
        }
    }

    /// Fetch a block by height.
    pub fn fetch_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.hash_by_height(height)? {
            None => Ok(None),
            Some(hash) => self.fetch_block(&hash),
        }
    }

    /// Where a transaction landed, if anywhere.
    pub fn fetch_tx_location(&self, tx_hash: &Hash) -> Result<Option<TxLocation>> {
        let txs = self.cf(cf::TRANSACTIONS)?;
        match self.inner.get_cf(&txs, tx_hash.as_bytes())? {
            None => Ok(None),
            Some(bytes) => {
                let location =
                    bincode::deserialize(&bytes).map_err(|e| StorageError::Corrupt {
                        key: tx_hash.to_hex(),
                        reason: e.to_string(),
                    })?;
                Ok(Some(location))
            }
        }
    }

    /// The current tip hash, if the chain is non-empty.
    pub fn tip_hash(&self) -> Result<Option<Hash>> {
        let _guard = self.write_lock.read();
        let meta = self.cf(cf::METADATA)?;
        match self.inner.get_cf(&meta, TIP_KEY)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Hash::from_slice(&bytes).map_err(|e| {
                StorageError::Corrupt {
                    key: "tip".into(),
                    reason: e.to_string(),
                }
            })?)),
        }
    }

    /// The current tip block, if the chain is non-empty.
    pub fn tip(&self) -> Result<Option<Block>> {
        match self.tip_hash()? {
            None => Ok(None),
            Some(hash) => self.fetch_block(&hash),
        }
    }

    /// Persist our bid's opening values for score generation.
    pub fn store_bid(&self, commitment: &Hash, bid: &StoredBid) -> Result<()> {
        let bids = self.cf(cf::BIDS)?;
        self.inner
            .put_cf(&bids, commitment.as_bytes(), bincode::serialize(bid)?)?;
        Ok(())
    }

    /// Fetch our stored bid values.
    pub fn fetch_bid(&self, commitment: &Hash) -> Result<Option<StoredBid>> {
        let bids = self.cf(cf::BIDS)?;
        match self.inner.get_cf(&bids, commitment.as_bytes())? {
            None => Ok(None),
            Some(bytes) => {
                let bid = bincode::deserialize(&bytes).map_err(|e| StorageError::Corrupt {
                    key: commitment.to_hex(),
                    reason: e.to_string(),
                })?;
                Ok(Some(bid))
            }
        }
    }

    /// Successor blocks of `locator`, up to `limit`.
    ///
    /// Serves `GetBlocks`: walks the height index from the locator's height
    /// plus one toward the tip.
    pub fn successors(&self, locator: &Hash, limit: usize) -> Result<Vec<Block>> {
        let start = match self.fetch_block(locator)? {
            None => return Ok(Vec::new()),
            Some(block) => block.height() + 1,
        };

        let mut out = Vec::new();
        for height in start.. {
            if out.len() >= limit {
                break;
            }
            match self.fetch_block_by_height(height)? {
                Some(block) => out.push(block),
                None => break,
            }
        }
        Ok(out)
    }
}
