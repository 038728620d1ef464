//! Binary agreement and the common coin.
//!
//! When a round's reduction cannot converge, the committee runs a binary
//! vote between the candidate hash and the canonical empty block. A stalled
//! binary step is tie-broken by the common coin: every observed vote's
//! `(score, index)` is hashed with Sha3-256 and the numerically smallest
//! digest decides, bit zero selecting the block and bit one the empty
//! block. The step counter is hard-capped; exceeding the cap fails the
//! round.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use umbra_bus::EventBus;
use umbra_crypto::bls::{BlsPublicKey, BlsSignature};
use umbra_crypto::ed25519::{EdPublicKey, EdSignature};
use umbra_crypto::hash::sha3_256_multi;
use umbra_crypto::NodeKeys;
use umbra_types::{BlsSignatureBytes, EdSignatureBytes, Hash, PublicKeyBytes};
use umbra_wire::{AgreementPayload, BinaryMessage, ConsensusHeader, Payload, Topic};

use crate::sortition::Committee;
use crate::state::RoundUpdate;
use crate::MAX_STEPS;

/// Flip the common coin over the observed votes.
///
/// Each vote contributes `Sha3-256(score || index_le32)`; the numerically
/// smallest digest's lowest bit is the coin. With no votes the coin is 1
/// (the empty block), the conservative outcome.
pub fn common_coin(votes: &[(Hash, u32)]) -> u8 {
    let mut smallest = [0xffu8; 32];
    for (score, index) in votes {
        let digest = sha3_256_multi(&[score.as_bytes(), &index.to_le_bytes()]);
        if digest < smallest {
            smallest = digest;
        }
    }
    smallest[31] & 1
}

/// How a binary agreement run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryOutcome {
    /// The committee converged on a hash
    Decided {
        /// The winning hash
        hash: Hash,
        /// Whether the winner is the empty block
        empty: bool,
    },
    /// The step cap was reached without a winner
    Failed,
}

/// The binary agreement loop.
pub struct BinaryAgreement {
    keys: NodeKeys,
    event_bus: Arc<EventBus>,
}

impl BinaryAgreement {
    /// A loop voting with `keys`.
    pub fn new(keys: NodeKeys, event_bus: Arc<EventBus>) -> Self {
        Self { keys, event_bus }
    }

    fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.keys.bls_public.to_bytes())
    }

    /// Build and sign our binary vote.
    fn own_vote(
        &self,
        update: &RoundUpdate,
        step: u8,
        held: Hash,
        empty_hash: Hash,
        score: Hash,
    ) -> BinaryMessage {
        let signature =
            BlsSignatureBytes(self.keys.bls_secret.sign(held.as_bytes()).to_bytes());
        let mut msg = BinaryMessage {
            header: ConsensusHeader {
                round: update.round,
                step,
                block_hash: held,
                sender: self.public_key(),
            },
            empty: held == empty_hash,
            prev_hash: update.last_hash(),
            score,
            signature,
            ed_key: self.keys.ed_public().to_bytes(),
            ed_signature: EdSignatureBytes::ZERO,
        };
        msg.ed_signature = EdSignatureBytes(self.keys.ed.sign(&msg.envelope_bytes()).to_bytes());
        msg
    }

    /// Run the loop from `start_step` until a decision, the step cap, or
    /// cancellation.
    ///
    /// `block_hash` is the candidate under dispute and `empty_hash` the
    /// canonical empty block for this round. Returns the outcome and the
    /// step the loop stopped at.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        update: &RoundUpdate,
        start_step: u8,
        block_hash: Hash,
        empty_hash: Hash,
        score: Hash,
        lambda: Duration,
        rx: &mut mpsc::UnboundedReceiver<BinaryMessage>,
        cancel: &CancellationToken,
    ) -> (BinaryOutcome, u8) {
        let mut held = block_hash;
        let mut step = start_step;

        while step < MAX_STEPS {
            if cancel.is_cancelled() {
                return (BinaryOutcome::Failed, step);
            }

            let committee =
                Committee::deterministic(&update.seed, update.round, step, &update.provisioners);
            let mut tally = BinaryTally::new(&committee, update, step);

            if committee.is_member(&self.public_key()) {
                let own = self.own_vote(update, step, held, empty_hash, score);
                match binary_frame(&own) {
                    Ok(payload) => {
                        self.event_bus.publish(Topic::Gossip, payload);
                    }
                    Err(e) => warn!(error = %e, "binary vote encode failed"),
                }
                tally.add(&own);
            }

            let winner = self
                .count_votes(&mut tally, lambda, rx, cancel)
                .await;

            match winner {
                Some((hash, empty)) => {
                    debug!(round = update.round, step, hash = %hash, "binary agreement decided");
                    return (BinaryOutcome::Decided { hash, empty }, step);
                }
                None => {
                    // Stalled: flip the coin over everything we saw.
                    let coin = common_coin(&tally.coin_inputs);
                    held = if coin == 0 { block_hash } else { empty_hash };
                    debug!(round = update.round, step, coin, "common coin flipped");
                    step = step.saturating_add(1);
                }
            }
        }

        (BinaryOutcome::Failed, step)
    }

    async fn count_votes(
        &self,
        tally: &mut BinaryTally<'_>,
        lambda: Duration,
        rx: &mut mpsc::UnboundedReceiver<BinaryMessage>,
        cancel: &CancellationToken,
    ) -> Option<(Hash, bool)> {
        if let Some(winner) = tally.winner() {
            return Some(winner);
        }

        let deadline = tokio::time::sleep(lambda);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut deadline => return None,
                msg = rx.recv() => match msg {
                    None => return None,
                    Some(msg) => {
                        tally.add(&msg);
                        if let Some(winner) = tally.winner() {
                            return Some(winner);
                        }
                    }
                }
            }
        }
    }
}

fn binary_frame(msg: &BinaryMessage) -> umbra_wire::Result<Payload> {
    let payload = Payload::Agreement(Box::new(AgreementPayload::Binary(msg.clone())));
    Ok(Payload::Gossip(payload.to_frame()?))
}

/// Weighted binary vote counting for one step.
struct BinaryTally<'a> {
    committee: &'a Committee,
    update: &'a RoundUpdate,
    step: u8,
    counts: HashMap<Hash, (usize, bool)>,
    seen: HashSet<PublicKeyBytes>,
    /// `(score, arrival index)` of every counted vote, for the coin.
    coin_inputs: Vec<(Hash, u32)>,
}

impl<'a> BinaryTally<'a> {
    fn new(committee: &'a Committee, update: &'a RoundUpdate, step: u8) -> Self {
        Self {
            committee,
            update,
            step,
            counts: HashMap::new(),
            seen: HashSet::new(),
            coin_inputs: Vec::new(),
        }
    }

    fn add(&mut self, msg: &BinaryMessage) {
        if msg.header.round != self.update.round || msg.header.step != self.step {
            return;
        }
        if msg.prev_hash != self.update.last_hash() {
            return;
        }
        let weight = self.committee.votes_for(&msg.header.sender);
        if weight == 0 {
            trace!(sender = ?msg.header.sender, "binary vote from non-member");
            return;
        }
        if !self.verify_signatures(msg) {
            return;
        }
        if !self.seen.insert(msg.header.sender) {
            return;
        }

        let entry = self
            .counts
            .entry(msg.header.block_hash)
            .or_insert((0, msg.empty));
        entry.0 += weight;
        self.coin_inputs
            .push((msg.score, self.coin_inputs.len() as u32));
    }

    fn verify_signatures(&self, msg: &BinaryMessage) -> bool {
        let provisioner = match self.update.provisioners.get(&msg.header.sender) {
            Some(p) if p.ed_key == msg.ed_key => p,
            _ => return false,
        };
        let _ = provisioner;

        let ed_key = match EdPublicKey::from_bytes(&msg.ed_key) {
            Ok(k) => k,
            Err(_) => return false,
        };
        let ed_sig = EdSignature::from_bytes(msg.ed_signature.as_bytes());
        if !ed_key.verify(&msg.envelope_bytes(), &ed_sig) {
            return false;
        }

        let bls_key = match BlsPublicKey::from_bytes(msg.header.sender.as_bytes()) {
            Ok(k) => k,
            Err(_) => return false,
        };
        match BlsSignature::from_bytes(msg.signature.as_bytes()) {
            Ok(sig) => sig.verify(msg.header.block_hash.as_bytes(), &bls_key),
            Err(_) => false,
        }
    }

    fn winner(&self) -> Option<(Hash, bool)> {
        let quorum = self.committee.quorum();
        self.counts
            .iter()
            .find(|(_, (weight, _))| *weight >= quorum)
            .map(|(hash, (_, empty))| (*hash, *empty))
    }
}
