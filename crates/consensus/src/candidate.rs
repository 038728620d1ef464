//! Candidate block assembly.
//!
//! When our score survives the threshold, we assemble a block from the
//! mempool's fee-sorted view, prepend the coinbase, bind the score to the
//! block hash, and publish both the `Score` and the `Candidate` on gossip.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use umbra_bus::{EventBus, RpcBus};
use umbra_crypto::NodeKeys;
use umbra_types::transaction::Distribute;
use umbra_types::{Block, BlockHeader, ContractCall, EdSignatureBytes, PublicKeyBytes};
use umbra_wire::{CandidateMessage, Payload, RpcCall, RpcReply, ScoreMessage, Topic};

use crate::state::RoundUpdate;
use crate::{ConsensusError, Result};

/// Coinbase reward per block.
pub const BLOCK_REWARD: u64 = 16_000_000_000;

/// Assembles and publishes our candidate blocks.
pub struct CandidateGenerator {
    keys: NodeKeys,
    rpc_bus: Arc<RpcBus>,
    event_bus: Arc<EventBus>,
    max_block_bytes: usize,
    mempool_timeout: Duration,
}

impl CandidateGenerator {
    /// A generator publishing over the given buses.
    pub fn new(
        keys: NodeKeys,
        rpc_bus: Arc<RpcBus>,
        event_bus: Arc<EventBus>,
        max_block_bytes: usize,
    ) -> Self {
        Self {
            keys,
            rpc_bus,
            event_bus,
            max_block_bytes,
            mempool_timeout: Duration::from_secs(2),
        }
    }

    /// Build a candidate for our score, publish it, and return both.
    ///
    /// The returned score carries the candidate hash in its header.
    pub async fn generate(
        &self,
        update: &RoundUpdate,
        mut score: ScoreMessage,
    ) -> Result<(ScoreMessage, Block)> {
        let mut txs = vec![ContractCall::Distribute(Distribute {
            reward: BLOCK_REWARD,
            generator: PublicKeyBytes(self.keys.bls_public.to_bytes()),
        })];
        txs.extend(self.fetch_pool_view().await);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
            .max(update.last_timestamp() + 1);

        let header = BlockHeader {
            version: update.tip.version,
            height: update.round,
            timestamp,
            prev_hash: update.last_hash(),
            seed: score.seed,
            tx_root: umbra_types::Hash::NIL, // filled by Block::new
            state_root: update.tip.state_root,
            generator: PublicKeyBytes(self.keys.bls_public.to_bytes()),
            certificate: Default::default(),
        };
        let block = Block::new(header, txs);
        let hash = block.hash();

        score.header.block_hash = hash;

        let candidate = CandidateMessage {
            block: block.clone(),
            ed_key: self.keys.ed_public().to_bytes(),
            ed_signature: EdSignatureBytes(self.keys.ed.sign(hash.as_bytes()).to_bytes()),
        };

        info!(
            round = update.round,
            hash = %hash,
            txs = block.txs.len(),
            "publishing candidate"
        );

        self.publish(Payload::Score(Box::new(score.clone())))?;
        self.publish(Payload::Candidate(Box::new(candidate)))?;
        Ok((score, block))
    }

    async fn fetch_pool_view(&self) -> Vec<ContractCall> {
        let call = RpcCall::GetMempoolTxsBySize {
            max_bytes: self.max_block_bytes as u32,
        };
        match self.rpc_bus.call(call, self.mempool_timeout).await {
            Ok(RpcReply::Txs(txs)) => txs,
            Ok(_) => Vec::new(),
            Err(e) => {
                // An unreachable pool yields an empty candidate rather than
                // a missed slot.
                warn!(error = %e, "mempool view unavailable, assembling empty candidate");
                Vec::new()
            }
        }
    }

    fn publish(&self, payload: Payload) -> Result<()> {
        let frame = payload
            .to_frame()
            .map_err(|e| ConsensusError::InvalidMessage(e.to_string()))?;
        self.event_bus.publish(Topic::Gossip, Payload::Gossip(frame));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::{Hash, Provisioners, Seed};
    use umbra_wire::ConsensusHeader;

    fn update() -> RoundUpdate {
        RoundUpdate {
            round: 1,
            provisioners: Arc::new(Provisioners::new()),
            bids: Default::default(),
            seed: Seed::ZERO,
            tip: BlockHeader::default(),
        }
    }

    fn score(keys: &NodeKeys) -> ScoreMessage {
        ScoreMessage {
            header: ConsensusHeader {
                round: 1,
                step: 1,
                block_hash: Hash::NIL,
                sender: PublicKeyBytes(keys.bls_public.to_bytes()),
            },
            score: Hash::sha3(b"score"),
            proof: vec![1, 2, 3],
            seed: Seed::ZERO,
            prev_hash: BlockHeader::default().hash(),
        }
    }

    #[tokio::test]
    async fn candidate_has_coinbase_first_and_bound_score() {
        let keys = NodeKeys::from_seed(&[2u8; 32]).unwrap();
        let rpc_bus = Arc::new(RpcBus::new());
        let event_bus = Arc::new(EventBus::new());
        let generator = CandidateGenerator::new(
            keys.clone(),
            rpc_bus,
            Arc::clone(&event_bus),
            1_000_000,
        );
        let mut gossip_rx = event_bus.subscribe(Topic::Gossip);

        let update = update();
        // No mempool registered: the candidate is coinbase-only.
        let (score, block) = generator.generate(&update, score(&keys)).await.unwrap();

        assert_eq!(block.height(), 1);
        assert_eq!(block.header.prev_hash, update.last_hash());
        assert!(block.header.timestamp > update.last_timestamp());
        assert_eq!(block.txs.len(), 1);
        assert!(block.txs[0].is_coinbase());
        assert!(block.validate_tx_root());
        assert_eq!(score.header.block_hash, block.hash());

        // Both frames hit the gossip stream: score first, then candidate.
        let first = gossip_rx.recv().await.unwrap();
        let second = gossip_rx.recv().await.unwrap();
        match (first, second) {
            (Payload::Gossip(a), Payload::Gossip(b)) => {
                assert_eq!(a.topic, Topic::Score);
                assert_eq!(b.topic, Topic::Candidate);
            }
            _ => panic!("expected gossip frames"),
        }
    }

    #[tokio::test]
    async fn candidate_signature_verifies() {
        let keys = NodeKeys::from_seed(&[3u8; 32]).unwrap();
        let rpc_bus = Arc::new(RpcBus::new());
        let event_bus = Arc::new(EventBus::new());
        let generator =
            CandidateGenerator::new(keys.clone(), rpc_bus, event_bus.clone(), 1_000_000);
        let mut gossip_rx = event_bus.subscribe(Topic::Gossip);

        let update = update();
        let (_score, block) = generator.generate(&update, score(&keys)).await.unwrap();

        // Pull the candidate frame and check the envelope.
        let _score_frame = gossip_rx.recv().await.unwrap();
        let candidate_frame = match gossip_rx.recv().await.unwrap() {
            Payload::Gossip(frame) => frame,
            _ => unreachable!(),
        };
        let candidate = match Payload::decode(Topic::Candidate, &candidate_frame.payload).unwrap() {
            Payload::Candidate(c) => c,
            _ => unreachable!(),
        };

        let ed_key = umbra_crypto::ed25519::EdPublicKey::from_bytes(&candidate.ed_key).unwrap();
        let signature =
            umbra_crypto::ed25519::EdSignature::from_bytes(candidate.ed_signature.as_bytes());
        assert!(ed_key.verify(block.hash().as_bytes(), &signature));
    }
}
