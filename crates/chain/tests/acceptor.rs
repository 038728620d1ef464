//! Acceptor integration tests: monotonicity, certificate checks, reorg
//! refusal.

use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

use umbra_bus::EventBus;
use umbra_chain::{genesis_block, Acceptor, ChainError, GenesisKind, Registry};
use umbra_consensus::Committee;
use umbra_crypto::bls::BlsSignature;
use umbra_crypto::NodeKeys;
use umbra_oracle::harness::HarnessOracle;
use umbra_oracle::Oracle;
use umbra_storage::{Database, DatabaseConfig};
use umbra_types::transaction::{Distribute, Transfer};
use umbra_types::{
    BidList, Block, BlockHeader, BlsSignatureBytes, Certificate, ContractCall, Hash, Provisioners,
    PublicKeyBytes, Stake,
};

struct Fixture {
    _dir: TempDir,
    acceptor: Arc<Acceptor>,
    registry: Arc<Registry>,
    keys: Vec<NodeKeys>,
    provisioners: Provisioners,
    round_rx: mpsc::Receiver<umbra_consensus::RoundUpdate>,
}

fn provisioner_fixture(count: u8) -> (Vec<NodeKeys>, Provisioners) {
    let mut provisioners = Provisioners::new();
    let mut keys = Vec::new();
    for i in 0..count {
        let nk = NodeKeys::from_seed(&[i + 1; 32]).unwrap();
        provisioners.add_stake(
            nk.ed_public().to_bytes(),
            PublicKeyBytes(nk.bls_public.to_bytes()),
            Stake {
                amount: 1_000,
                start_height: 0,
                end_height: u64::MAX,
            },
        );
        keys.push(nk);
    }
    (keys, provisioners)
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(dir.path(), DatabaseConfig::default()).unwrap());
    let genesis = genesis_block(GenesisKind::New);
    db.store_block(&genesis).unwrap();

    let (keys, provisioners) = provisioner_fixture(4);
    let oracle = Arc::new(HarnessOracle::new());
    oracle.set_provisioners(provisioners.clone());

    let (registry, writer) = Registry::create(genesis, provisioners.clone(), BidList::new());
    let (round_tx, round_rx) = mpsc::channel(8);
    let acceptor = Arc::new(Acceptor::new(
        db,
        writer,
        oracle as Arc<dyn Oracle>,
        Arc::new(EventBus::new()),
        round_tx,
    ));

    Fixture {
        _dir: dir,
        acceptor,
        registry,
        keys,
        provisioners,
        round_rx,
    }
}

fn block_over(tip: &BlockHeader, generator: &NodeKeys, tag: u8) -> Block {
    let txs = vec![
        ContractCall::Distribute(Distribute {
            reward: 50,
            generator: PublicKeyBytes(generator.bls_public.to_bytes()),
        }),
        ContractCall::Transfer(Transfer {
            fee: 100,
            nullifiers: vec![Hash::sha3(&[tag])],
            outputs: vec![],
            proof: vec![],
        }),
    ];
    Block::new(
        BlockHeader {
            height: tip.height + 1,
            timestamp: tip.timestamp + 1,
            prev_hash: tip.hash(),
            seed: tip.seed,
            state_root: tip.state_root,
            generator: PublicKeyBytes(generator.bls_public.to_bytes()),
            ..Default::default()
        },
        txs,
    )
}

/// Sign `hash` with every committee member at `step`, aggregated.
fn phase_signatures(
    fixture_keys: &[NodeKeys],
    provisioners: &Provisioners,
    tip: &BlockHeader,
    round: u64,
    step: u8,
    hash: &Hash,
) -> (BlsSignatureBytes, Vec<PublicKeyBytes>) {
    let committee = Committee::deterministic(&tip.seed, round, step, provisioners);
    let mut sigs = Vec::new();
    let mut voters = Vec::new();
    for nk in fixture_keys {
        let key = PublicKeyBytes(nk.bls_public.to_bytes());
        if committee.is_member(&key) {
            sigs.push(nk.bls_secret.sign(hash.as_bytes()));
            voters.push(key);
        }
    }
    let refs: Vec<&BlsSignature> = sigs.iter().collect();
    let aggregate = BlsSignature::aggregate(&refs).unwrap();
    (BlsSignatureBytes(aggregate.to_bytes()), voters)
}

fn certificate_for(fx: &Fixture, tip: &BlockHeader, block: &Block) -> Certificate {
    let hash = block.hash();
    let round = block.header.height;
    let (first_signature, first_keys) =
        phase_signatures(&fx.keys, &fx.provisioners, tip, round, 2, &hash);
    let (signature, keys) = phase_signatures(&fx.keys, &fx.provisioners, tip, round, 3, &hash);
    Certificate {
        step: 3,
        signature,
        keys,
        first_step: 2,
        first_signature,
        first_keys,
    }
}

#[tokio::test]
async fn accepts_a_certified_block_and_produces_a_round_update() {
    let mut fx = fixture();
    let tip = fx.registry.tip_header();
    let block = block_over(&tip, &fx.keys[0], 1);
    let certificate = certificate_for(&fx, &tip, &block);

    fx.acceptor.accept(block.clone(), certificate).await.unwrap();

    assert_eq!(fx.registry.tip_height(), 1);
    assert_eq!(fx.registry.tip().hash(), block.hash());

    let update = fx.round_rx.recv().await.unwrap();
    assert_eq!(update.round, 2);
    assert_eq!(update.tip.hash(), block.hash());
}

#[tokio::test]
async fn second_certificate_for_a_height_is_refused() {
    let fx = fixture();
    let tip = fx.registry.tip_header();

    let first = block_over(&tip, &fx.keys[0], 1);
    let cert_first = certificate_for(&fx, &tip, &first);
    fx.acceptor.accept(first.clone(), cert_first).await.unwrap();

    // A different, equally well-certified block for the same height.
    let second = block_over(&tip, &fx.keys[1], 2);
    assert_ne!(first.hash(), second.hash());
    let cert_second = certificate_for(&fx, &tip, &second);

    let err = fx.acceptor.accept(second, cert_second).await.unwrap_err();
    assert!(matches!(
        err,
        ChainError::BlockExists | ChainError::InvalidHeader(_)
    ));
    // The first block remains canonical.
    assert_eq!(fx.registry.tip().hash(), first.hash());
}

#[tokio::test]
async fn certificate_below_quorum_is_refused() {
    let fx = fixture();
    let tip = fx.registry.tip_header();
    let block = block_over(&tip, &fx.keys[0], 1);

    let mut certificate = certificate_for(&fx, &tip, &block);
    // Strip signers from the second phase until the weight cannot reach
    // quorum.
    certificate.keys.truncate(1);

    let err = fx.acceptor.accept(block, certificate).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidCertificate(_)));
}

#[tokio::test]
async fn certificate_over_wrong_hash_is_refused() {
    let fx = fixture();
    let tip = fx.registry.tip_header();
    let block = block_over(&tip, &fx.keys[0], 1);
    let other = block_over(&tip, &fx.keys[1], 9);

    // Signatures over a different block hash.
    let certificate = certificate_for(&fx, &tip, &other);
    let err = fx.acceptor.accept(block, certificate).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidCertificate(_)));
}

#[tokio::test]
async fn multiple_coinbases_are_refused() {
    let fx = fixture();
    let tip = fx.registry.tip_header();

    let coinbase = ContractCall::Distribute(Distribute {
        reward: 50,
        generator: PublicKeyBytes(fx.keys[0].bls_public.to_bytes()),
    });
    let block = Block::new(
        BlockHeader {
            height: 1,
            timestamp: tip.timestamp + 1,
            prev_hash: tip.hash(),
            seed: tip.seed,
            state_root: tip.state_root,
            ..Default::default()
        },
        vec![coinbase.clone(), coinbase],
    );
    let certificate = certificate_for(&fx, &tip, &block);

    let err = fx.acceptor.accept(block, certificate).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidBody(_)));
}

#[tokio::test]
async fn bad_header_is_refused() {
    let fx = fixture();
    let tip = fx.registry.tip_header();

    // Wrong height.
    let mut block = block_over(&tip, &fx.keys[0], 1);
    block.header.height = 5;
    let certificate = certificate_for(&fx, &tip, &block);
    let err = fx.acceptor.accept(block, certificate).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidHeader(_)));

    // Timestamp not after the tip.
    let mut block = block_over(&tip, &fx.keys[0], 2);
    block.header.timestamp = tip.timestamp;
    let certificate = certificate_for(&fx, &tip, &block);
    let err = fx.acceptor.accept(block, certificate).await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidHeader(_)));
}

#[tokio::test]
async fn empty_block_without_coinbase_is_acceptable() {
    let fx = fixture();
    let tip = fx.registry.tip_header();
    let block = Block::empty(&tip);
    let certificate = certificate_for(&fx, &tip, &block);

    fx.acceptor.accept(block.clone(), certificate).await.unwrap();
    assert_eq!(fx.registry.tip().hash(), block.hash());
}

#[tokio::test]
async fn candidate_verification_uses_the_oracle() {
    let fx = fixture();
    let tip = fx.registry.tip_header();
    let block = block_over(&tip, &fx.keys[0], 1);
    fx.acceptor.verify_candidate(&block).await.unwrap();

    // A duplicate of the chain tip fails the sanity check.
    let stale = genesis_block(GenesisKind::New);
    assert!(fx.acceptor.verify_candidate(&stale).await.is_err());
}
