//! Block-level integration tests: header hashing, roots, eviction proofs.

use umbra_types::transaction::{Distribute, Transfer};
use umbra_types::{Block, BlockHeader, Certificate, ContractCall, Hash, MerkleTree, PublicKeyBytes};

fn transfer(tag: u8) -> ContractCall {
    ContractCall::Transfer(Transfer {
        fee: 100 + tag as u64,
        nullifiers: vec![Hash::sha3(&[tag])],
        outputs: vec![Hash::sha3(&[tag, tag])],
        proof: vec![tag; 32],
    })
}

#[test]
fn block_hash_is_stable_across_certificate_attachment() {
    let parent = BlockHeader::default();
    let mut block = Block::new(
        BlockHeader {
            height: 1,
            timestamp: 10,
            prev_hash: parent.hash(),
            ..Default::default()
        },
        vec![transfer(1), transfer(2)],
    );
    let pre = block.hash();

    block.header.certificate = Certificate {
        step: 4,
        keys: vec![PublicKeyBytes([9; 48])],
        ..Default::default()
    };
    assert_eq!(block.hash(), pre);
}

#[test]
fn tx_root_matches_body() {
    let block = Block::new(BlockHeader::default(), vec![transfer(1), transfer(2), transfer(3)]);
    assert!(block.validate_tx_root());

    let mut tampered = block.clone();
    tampered.txs.pop();
    assert!(!tampered.validate_tx_root());
}

#[test]
fn merkle_tree_proves_membership_of_every_block_tx() {
    let txs: Vec<ContractCall> = (0..9).map(transfer).collect();
    let block = Block::new(BlockHeader::default(), txs.clone());

    let tree = MerkleTree::build(&block.txs.iter().map(|t| t.hash()).collect::<Vec<_>>());
    assert_eq!(tree.root(), block.header.tx_root);
    for tx in &txs {
        assert!(tree.verify_inclusion(&tx.hash()));
    }
    assert!(!tree.verify_inclusion(&transfer(99).hash()));
}

#[test]
fn coinbase_is_first_call_in_candidate_shape() {
    let coinbase = ContractCall::Distribute(Distribute {
        reward: 50,
        generator: PublicKeyBytes([7; 48]),
    });
    let mut txs = vec![coinbase.clone()];
    txs.extend((0..3).map(transfer));
    let block = Block::new(BlockHeader::default(), txs);

    let coinbases: Vec<_> = block.txs.iter().filter(|t| t.is_coinbase()).collect();
    assert_eq!(coinbases.len(), 1);
    assert_eq!(block.txs[0], coinbase);
}

#[test]
fn encode_decode_round_trip() {
    let block = Block::new(
        BlockHeader {
            height: 42,
            timestamp: 4242,
            ..Default::default()
        },
        (0..5).map(transfer).collect(),
    );
    let bytes = block.encode().unwrap();
    assert_eq!(Block::decode(&bytes).unwrap(), block);
}
