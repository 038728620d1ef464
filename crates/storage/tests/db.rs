//! Storage integration tests over a temporary database.

use tempfile::TempDir;

use umbra_storage::{Database, DatabaseConfig, StorageError, StoredBid};
use umbra_types::transaction::Transfer;
use umbra_types::{Block, BlockHeader, ContractCall, Hash};

fn open() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path(), DatabaseConfig::default()).unwrap();
    (dir, db)
}

fn block_at(height: u64, parent: &BlockHeader, tag: u8) -> Block {
    Block::new(
        BlockHeader {
            height,
            timestamp: parent.timestamp + 1,
            prev_hash: parent.hash(),
            ..Default::default()
        },
        vec![ContractCall::Transfer(Transfer {
            fee: 10 + tag as u64,
            nullifiers: vec![Hash::sha3(&[tag])],
            outputs: vec![],
            proof: vec![],
        })],
    )
}

#[test]
fn store_and_fetch_round_trip() {
    let (_dir, db) = open();
    let genesis = BlockHeader::default();
    let block = block_at(1, &genesis, 1);

    db.store_block(&block).unwrap();

    assert!(db.block_exists(&block.hash()).unwrap());
    assert_eq!(db.fetch_block(&block.hash()).unwrap().unwrap(), block);
    assert_eq!(db.fetch_block_by_height(1).unwrap().unwrap(), block);
    assert_eq!(db.tip_hash().unwrap().unwrap(), block.hash());

    let location = db
        .fetch_tx_location(&block.txs[0].hash())
        .unwrap()
        .unwrap();
    assert_eq!(location.block_hash, block.hash());
    assert_eq!(location.index, 0);
}

#[test]
fn duplicate_height_is_rejected() {
    let (_dir, db) = open();
    let genesis = BlockHeader::default();
    let first = block_at(1, &genesis, 1);
    let second = block_at(1, &genesis, 2);
    assert_ne!(first.hash(), second.hash());

    db.store_block(&first).unwrap();
    assert!(matches!(
        db.store_block(&second),
        Err(StorageError::BlockExists)
    ));
    // The original block stays canonical for the height.
    assert_eq!(db.fetch_block_by_height(1).unwrap().unwrap(), first);
    assert_eq!(db.tip_hash().unwrap().unwrap(), first.hash());
}

#[test]
fn duplicate_hash_is_rejected() {
    let (_dir, db) = open();
    let block = block_at(1, &BlockHeader::default(), 1);
    db.store_block(&block).unwrap();
    assert!(matches!(
        db.store_block(&block),
        Err(StorageError::BlockExists)
    ));
}

#[test]
fn successors_walk_the_height_index() {
    let (_dir, db) = open();
    let genesis = Block::new(BlockHeader::default(), vec![]);
    db.store_block(&genesis).unwrap();

    let mut parent = genesis.header.clone();
    let mut hashes = Vec::new();
    for h in 1..=5 {
        let block = block_at(h, &parent, h as u8);
        db.store_block(&block).unwrap();
        parent = block.header.clone();
        hashes.push(block.hash());
    }

    let successors = db.successors(&genesis.hash(), 3).unwrap();
    assert_eq!(successors.len(), 3);
    assert_eq!(successors[0].hash(), hashes[0]);
    assert_eq!(successors[2].hash(), hashes[2]);

    // Unknown locator yields nothing.
    assert!(db.successors(&Hash::sha3(b"unknown"), 3).unwrap().is_empty());
}

#[test]
fn bid_values_round_trip() {
    let (_dir, db) = open();
    let commitment = Hash::sha3(b"m");
    let bid = StoredBid {
        d: Hash::sha3(b"d"),
        k: Hash::sha3(b"k"),
        index: 4,
        end_height: 1000,
    };
    db.store_bid(&commitment, &bid).unwrap();
    assert_eq!(db.fetch_bid(&commitment).unwrap().unwrap(), bid);
    assert!(db.fetch_bid(&Hash::sha3(b"other")).unwrap().is_none());
}

#[test]
fn empty_database_has_no_tip() {
    let (_dir, db) = open();
    assert!(db.tip_hash().unwrap().is_none());
    assert!(db.tip().unwrap().is_none());
}
