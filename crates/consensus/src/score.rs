//! Blind-bid score generation.
//!
//! The generator asks the oracle for a score proof each time the
//! coordinator triggers a generation step. An oracle failure means we are
//! not in this round's bid list and the generator stays silent; a score
//! that fails to beat the running threshold is discarded. The threshold is
//! lowered after every attempt so a quiet round converges on some
//! generator.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use umbra_crypto::NodeKeys;
use umbra_oracle::{GenerateScoreRequest, Oracle, OracleError};
use umbra_types::{Hash, PublicKeyBytes, Seed};
use umbra_wire::{ConsensusHeader, ScoreMessage};

use crate::state::{RoundUpdate, Threshold};

/// Our bid's secret opening values, loaded from the bid store.
#[derive(Debug, Clone)]
pub struct BidSecrets {
    /// The bid's secret `k`
    pub k: Hash,
    /// The bid's secret opening
    pub secret: Hash,
    /// The bid commitment `M`, used to find our stored index
    pub commitment: Hash,
}

/// Produces score proposals for our own candidate blocks.
pub struct ScoreGenerator {
    keys: NodeKeys,
    oracle: Arc<dyn Oracle>,
    secrets: Option<BidSecrets>,
    threshold: Threshold,
    signed_seed: Seed,
}

impl ScoreGenerator {
    /// A generator for a node that may or may not hold a bid.
    pub fn new(keys: NodeKeys, oracle: Arc<dyn Oracle>, secrets: Option<BidSecrets>) -> Self {
        Self {
            keys,
            oracle,
            secrets,
            threshold: Threshold::new(),
            signed_seed: Seed::ZERO,
        }
    }

    /// Set up for a new round: derive the round seed by BLS-signing the
    /// previous one and reset the threshold.
    pub fn init_round(&mut self, update: &RoundUpdate) {
        let signature = self.keys.bls_secret.sign(update.seed.as_bytes());
        self.signed_seed =
            Seed::from_slice(&signature.to_bytes()).expect("signature has seed length");
        self.threshold = Threshold::new();
    }

    /// The seed this node would commit to the next block it generates.
    pub fn signed_seed(&self) -> Seed {
        self.signed_seed
    }

    /// Attempt score generation for `step`.
    ///
    /// Returns `None` when we hold no bid, the oracle says we are not a
    /// bidder, or the score does not beat the threshold. The threshold is
    /// lowered on every attempt, successful or not.
    pub async fn generate(&mut self, update: &RoundUpdate, step: u8) -> Option<ScoreMessage> {
        let result = self.try_generate(update, step).await;
        self.threshold.lower();
        result
    }

    async fn try_generate(&mut self, update: &RoundUpdate, step: u8) -> Option<ScoreMessage> {
        let secrets = self.secrets.as_ref()?;

        let stored_bid_index = match update.bids.index_of(&secrets.commitment, update.round) {
            Some(index) => index,
            None => {
                trace!(round = update.round, "our bid is not in the active list");
                return None;
            }
        };

        let request = GenerateScoreRequest {
            k: secrets.k,
            seed: update.seed,
            secret: secrets.secret,
            round: update.round,
            step,
            stored_bid_index,
        };

        let response = match self.oracle.generate_score(request).await {
            Ok(response) => response,
            Err(OracleError::NotABidder) => {
                trace!(round = update.round, "oracle: not in the bid list");
                return None;
            }
            Err(e) if e.is_transient() => {
                warn!(round = update.round, error = %e, "score oracle unavailable");
                return None;
            }
            Err(e) => {
                warn!(round = update.round, error = %e, "score generation failed");
                return None;
            }
        };

        if self.threshold.exceeds(&response.score) {
            debug!(
                round = update.round,
                step,
                score = %response.score,
                "score below the running threshold"
            );
            return None;
        }

        debug!(round = update.round, step, score = %response.score, "score generated");
        Some(ScoreMessage {
            header: ConsensusHeader {
                round: update.round,
                step,
                // Filled with the candidate hash by the candidate generator.
                block_hash: Hash::NIL,
                sender: self.public_key(),
            },
            score: response.score,
            proof: response.proof,
            seed: self.signed_seed,
            prev_hash: update.last_hash(),
        })
    }

    /// Our BLS key in wire form.
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.keys.bls_public.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_oracle::harness::HarnessOracle;
    use umbra_types::{Bid, BidList, BlockHeader, Provisioners};

    fn update_with_bid(commitment: Hash) -> RoundUpdate {
        let mut bids = BidList::new();
        bids.push(Bid {
            x: Hash::sha3(b"x"),
            m: commitment,
            end_height: 1_000,
        });
        RoundUpdate {
            round: 1,
            provisioners: Arc::new(Provisioners::new()),
            bids,
            seed: Seed::ZERO,
            tip: BlockHeader::default(),
        }
    }

    fn generator(oracle: Arc<HarnessOracle>, commitment: Hash) -> ScoreGenerator {
        let keys = NodeKeys::from_seed(&[1u8; 32]).unwrap();
        ScoreGenerator::new(
            keys,
            oracle,
            Some(BidSecrets {
                k: Hash::sha3(b"k"),
                secret: Hash::sha3(b"s"),
                commitment,
            }),
        )
    }

    #[tokio::test]
    async fn no_bid_means_silence() {
        let oracle = Arc::new(HarnessOracle::new());
        let keys = NodeKeys::from_seed(&[1u8; 32]).unwrap();
        let mut generator = ScoreGenerator::new(keys, oracle, None);
        let update = update_with_bid(Hash::sha3(b"m"));
        generator.init_round(&update);
        assert!(generator.generate(&update, 1).await.is_none());
    }

    #[tokio::test]
    async fn not_a_bidder_means_silence() {
        let oracle = Arc::new(HarnessOracle::new());
        oracle.set_not_a_bidder(true);
        let commitment = Hash::sha3(b"m");
        let mut generator = generator(oracle, commitment);
        let update = update_with_bid(commitment);
        generator.init_round(&update);
        assert!(generator.generate(&update, 1).await.is_none());
    }

    #[tokio::test]
    async fn low_score_is_held_back_until_threshold_decays() {
        let oracle = Arc::new(HarnessOracle::new());
        // A score that starts below the 0x80.. threshold.
        let low = Hash::from_bytes({
            let mut b = [0u8; 32];
            b[0] = 0x20;
            b
        });
        oracle.set_fixed_score(Some(low));

        let commitment = Hash::sha3(b"m");
        let mut generator = generator(oracle, commitment);
        let update = update_with_bid(commitment);
        generator.init_round(&update);

        // 0x80 -> 0x40 -> 0x20 thresholds still reject; then 0x10 passes.
        assert!(generator.generate(&update, 1).await.is_none());
        assert!(generator.generate(&update, 2).await.is_none());
        assert!(generator.generate(&update, 3).await.is_none());
        let score = generator.generate(&update, 4).await.expect("score passes");
        assert_eq!(score.score, low);
        assert_eq!(score.header.round, 1);
    }

    #[tokio::test]
    async fn seed_is_signed_per_round() {
        let oracle = Arc::new(HarnessOracle::new());
        let commitment = Hash::sha3(b"m");
        let mut generator = generator(oracle, commitment);

        let update = update_with_bid(commitment);
        generator.init_round(&update);
        let first = generator.signed_seed();
        assert_ne!(first.as_bytes(), Seed::ZERO.as_bytes());

        let mut next = update.clone();
        next.seed = first;
        generator.init_round(&next);
        assert_ne!(generator.signed_seed().as_bytes(), first.as_bytes());
    }
}
