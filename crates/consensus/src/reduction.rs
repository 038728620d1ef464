//! The two reduction phases.
//!
//! Each phase lets the step committee vote on a block hash: members
//! BLS-sign the hash they hold and broadcast it, then everyone counts
//! weighted votes until a hash crosses quorum or the phase timer fires. A
//! timer expiry yields a nil result. When both phases agree on the same
//! non-nil hash with enough combined votes, the node emits an agreement
//! carrying both aggregated vote sets.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use umbra_bus::EventBus;
use umbra_crypto::bls::{BlsPublicKey, BlsSignature};
use umbra_crypto::ed25519::{EdPublicKey, EdSignature};
use umbra_crypto::NodeKeys;
use umbra_types::{BlsSignatureBytes, EdSignatureBytes, Hash, PublicKeyBytes};
use umbra_wire::{AgreementMessage, ConsensusHeader, Payload, ReductionMessage, StepVotes, Topic};

use crate::sortition::Committee;
use crate::state::RoundUpdate;

/// Outcome of one reduction phase.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    /// The winning hash, or [`Hash::NIL`] on timeout
    pub hash: Hash,
    /// The step the phase ran at
    pub step: u8,
    /// The winning hash's votes: voter key and signature
    pub votes: Vec<(PublicKeyBytes, BlsSignatureBytes)>,
    /// Total weighted votes collected for the winning hash
    pub weight: usize,
}

impl PhaseResult {
    /// A timed-out phase.
    pub fn nil(step: u8) -> Self {
        Self {
            hash: Hash::NIL,
            step,
            votes: Vec::new(),
            weight: 0,
        }
    }

    /// Whether the phase failed to converge.
    pub fn is_nil(&self) -> bool {
        self.hash.is_nil()
    }
}

/// Weighted vote counting for one `(round, step)` committee.
///
/// Per-sender first-in-wins: a committee member's second vote at the same
/// position is ignored.
pub(crate) struct VoteTally<'a> {
    committee: &'a Committee,
    update: &'a RoundUpdate,
    step: u8,
    counts: HashMap<Hash, usize>,
    seen: HashSet<PublicKeyBytes>,
    votes: HashMap<Hash, Vec<(PublicKeyBytes, BlsSignatureBytes)>>,
}

impl<'a> VoteTally<'a> {
    pub(crate) fn new(committee: &'a Committee, update: &'a RoundUpdate, step: u8) -> Self {
        Self {
            committee,
            update,
            step,
            counts: HashMap::new(),
            seen: HashSet::new(),
            votes: HashMap::new(),
        }
    }

    /// Count a vote; returns the winning hash once quorum is crossed.
    pub(crate) fn add(&mut self, msg: &ReductionMessage) -> Option<Hash> {
        let weight = match self.verify(msg) {
            Some(weight) => weight,
            None => return None,
        };

        if !self.seen.insert(msg.header.sender) {
            trace!(sender = ?msg.header.sender, "repeat vote ignored");
            return None;
        }

        let hash = msg.header.block_hash;
        self.votes
            .entry(hash)
            .or_default()
            .push((msg.header.sender, msg.signature));
        let count = self.counts.entry(hash).or_default();
        *count += weight;

        if *count >= self.committee.quorum() {
            Some(hash)
        } else {
            None
        }
    }

    /// Full verification: position, chain tip, membership, both signatures.
    fn verify(&self, msg: &ReductionMessage) -> Option<usize> {
        if msg.header.round != self.update.round || msg.header.step != self.step {
            return None;
        }
        if msg.prev_hash != self.update.last_hash() {
            trace!("vote for another chain tip");
            return None;
        }

        let weight = self.committee.votes_for(&msg.header.sender);
        if weight == 0 {
            trace!(sender = ?msg.header.sender, "vote from non-member");
            return None;
        }

        // The envelope key must be the provisioner's registered Ed25519 key.
        let provisioner = self.update.provisioners.get(&msg.header.sender)?;
        if provisioner.ed_key != msg.ed_key {
            warn!(sender = ?msg.header.sender, "envelope key mismatch");
            return None;
        }

        let ed_key = EdPublicKey::from_bytes(&msg.ed_key).ok()?;
        let ed_sig = EdSignature::from_bytes(msg.ed_signature.as_bytes());
        if !ed_key.verify(&msg.envelope_bytes(), &ed_sig) {
            warn!(sender = ?msg.header.sender, "bad envelope signature");
            return None;
        }

        let bls_key = BlsPublicKey::from_bytes(msg.header.sender.as_bytes()).ok()?;
        let bls_sig = BlsSignature::from_bytes(msg.signature.as_bytes()).ok()?;
        if !bls_sig.verify(msg.header.block_hash.as_bytes(), &bls_key) {
            warn!(sender = ?msg.header.sender, "bad vote signature");
            return None;
        }

        Some(weight)
    }

    /// The winning hash's votes.
    pub(crate) fn votes_for(&self, hash: &Hash) -> Vec<(PublicKeyBytes, BlsSignatureBytes)> {
        self.votes.get(hash).cloned().unwrap_or_default()
    }

    pub(crate) fn weight_for(&self, hash: &Hash) -> usize {
        self.counts.get(hash).copied().unwrap_or(0)
    }
}

/// Runs reduction phases and assembles agreements.
pub struct Reducer {
    keys: NodeKeys,
    event_bus: Arc<EventBus>,
}

impl Reducer {
    /// A reducer voting with `keys`.
    pub fn new(keys: NodeKeys, event_bus: Arc<EventBus>) -> Self {
        Self { keys, event_bus }
    }

    /// Our BLS key in wire form.
    fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.keys.bls_public.to_bytes())
    }

    /// Build and sign our vote for `held` at `(round, step)`.
    pub fn own_vote(&self, update: &RoundUpdate, step: u8, held: Hash) -> ReductionMessage {
        let signature = BlsSignatureBytes(
            self.keys.bls_secret.sign(held.as_bytes()).to_bytes(),
        );
        let mut msg = ReductionMessage {
            header: ConsensusHeader {
                round: update.round,
                step,
                block_hash: held,
                sender: self.public_key(),
            },
            prev_hash: update.last_hash(),
            signature,
            ed_key: self.keys.ed_public().to_bytes(),
            ed_signature: EdSignatureBytes::ZERO,
        };
        msg.ed_signature = EdSignatureBytes(self.keys.ed.sign(&msg.envelope_bytes()).to_bytes());
        msg
    }

    /// Run one reduction phase.
    ///
    /// Broadcasts our vote if we sit on the committee, then counts votes
    /// from `rx` until quorum, the `lambda` deadline, or cancellation.
    pub async fn run_phase(
        &self,
        update: &RoundUpdate,
        step: u8,
        held: Hash,
        lambda: Duration,
        rx: &mut mpsc::UnboundedReceiver<ReductionMessage>,
        cancel: &CancellationToken,
    ) -> PhaseResult {
        let committee = Committee::deterministic(&update.seed, update.round, step, &update.provisioners);
        let mut tally = VoteTally::new(&committee, update, step);

        if committee.is_member(&self.public_key()) {
            let own = self.own_vote(update, step, held);
            debug!(round = update.round, step, hash = %held, "casting reduction vote");
            match Payload::Reduction(Box::new(own.clone())).to_frame() {
                Ok(frame) => {
                    self.event_bus.publish(Topic::Gossip, Payload::Gossip(frame));
                }
                Err(e) => warn!(error = %e, "reduction vote encode failed"),
            }
            if let Some(winner) = tally.add(&own) {
                return PhaseResult {
                    votes: tally.votes_for(&winner),
                    weight: tally.weight_for(&winner),
                    hash: winner,
                    step,
                };
            }
        }

        let deadline = tokio::time::sleep(lambda);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return PhaseResult::nil(step),
                _ = &mut deadline => {
                    debug!(round = update.round, step, "reduction timer fired");
                    return PhaseResult::nil(step);
                }
                msg = rx.recv() => match msg {
                    None => return PhaseResult::nil(step),
                    Some(msg) => {
                        if let Some(winner) = tally.add(&msg) {
                            debug!(round = update.round, step, hash = %winner, "reduction quorum");
                            return PhaseResult {
                                votes: tally.votes_for(&winner),
                                weight: tally.weight_for(&winner),
                                hash: winner,
                                step,
                            };
                        }
                    }
                }
            }
        }
    }

    /// Combine two phase results into an agreement when reduction
    /// succeeded: identical non-nil hashes and at least `2 * quorum`
    /// combined votes.
    pub fn agreement_from(
        &self,
        update: &RoundUpdate,
        first: &PhaseResult,
        second: &PhaseResult,
    ) -> Option<AgreementMessage> {
        if first.is_nil() || second.is_nil() || first.hash != second.hash {
            return None;
        }

        let committee = Committee::deterministic(
            &update.seed,
            update.round,
            second.step,
            &update.provisioners,
        );
        if first.weight + second.weight < 2 * committee.quorum() {
            return None;
        }

        let first_votes = aggregate_step(first)?;
        let second_votes = aggregate_step(second)?;

        let mut msg = AgreementMessage {
            header: ConsensusHeader {
                round: update.round,
                step: second.step,
                block_hash: second.hash,
                sender: self.public_key(),
            },
            prev_hash: update.last_hash(),
            votes: vec![first_votes, second_votes],
            ed_key: self.keys.ed_public().to_bytes(),
            ed_signature: EdSignatureBytes::ZERO,
        };
        msg.ed_signature = EdSignatureBytes(self.keys.ed.sign(&msg.envelope_bytes()).to_bytes());
        Some(msg)
    }
}

/// Aggregate a phase's winning votes into a `StepVotes`.
fn aggregate_step(result: &PhaseResult) -> Option<StepVotes> {
    if result.votes.is_empty() {
        return None;
    }

    let mut decoded = Vec::with_capacity(result.votes.len());
    for (_, sig) in &result.votes {
        decoded.push(BlsSignature::from_bytes(sig.as_bytes()).ok()?);
    }
    let refs: Vec<&BlsSignature> = decoded.iter().collect();
    let aggregate = BlsSignature::aggregate(&refs).ok()?;

    Some(StepVotes {
        step: result.step,
        signature: BlsSignatureBytes(aggregate.to_bytes()),
        voters: result.votes.iter().map(|(key, _)| *key).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::{BlockHeader, Provisioners, Seed, Stake};

    fn fixture(count: u8) -> (Vec<NodeKeys>, RoundUpdate) {
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
        let update = RoundUpdate {
            round: 1,
            provisioners: Arc::new(provisioners),
            bids: Default::default(),
            seed: Seed::ZERO,
            tip: BlockHeader::default(),
        };
        (keys, update)
    }

    fn vote_from(keys: &NodeKeys, update: &RoundUpdate, step: u8, hash: Hash) -> ReductionMessage {
        Reducer::new(keys.clone(), Arc::new(EventBus::new())).own_vote(update, step, hash)
    }

    fn phase_result(
        keys: &[NodeKeys],
        update: &RoundUpdate,
        step: u8,
        hash: Hash,
    ) -> PhaseResult {
        let committee =
            Committee::deterministic(&update.seed, update.round, step, &update.provisioners);
        let mut tally = VoteTally::new(&committee, update, step);
        let mut winner = None;
        for nk in keys {
            let msg = vote_from(nk, update, step, hash);
            if let Some(w) = tally.add(&msg) {
                winner = Some(w);
            }
        }
        let winner = winner.unwrap_or(Hash::NIL);
        PhaseResult {
            votes: tally.votes_for(&winner),
            weight: tally.weight_for(&winner),
            hash: winner,
            step,
        }
    }

    #[test]
    fn tally_reaches_quorum_with_valid_votes() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"candidate");
        let result = phase_result(&keys, &update, 2, hash);
        assert_eq!(result.hash, hash);
        assert!(result.weight >= 3); // quorum of 4
    }

    #[test]
    fn repeat_and_foreign_votes_do_not_count() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"candidate");
        let committee =
            Committee::deterministic(&update.seed, update.round, 2, &update.provisioners);
        let mut tally = VoteTally::new(&committee, &update, 2);

        let msg = vote_from(&keys[0], &update, 2, hash);
        assert!(tally.add(&msg).is_none());
        // Same sender again: ignored.
        assert!(tally.add(&msg).is_none());
        assert_eq!(tally.weight_for(&hash), committee.votes_for(&msg.header.sender));

        // A non-member's vote is ignored.
        let outsider = NodeKeys::from_seed(&[99; 32]).unwrap();
        let msg = vote_from(&outsider, &update, 2, hash);
        assert!(tally.add(&msg).is_none());

        // A vote for another tip is ignored.
        let mut msg = vote_from(&keys[1], &update, 2, hash);
        msg.prev_hash = Hash::sha3(b"fork");
        assert!(tally.add(&msg).is_none());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"candidate");
        let committee =
            Committee::deterministic(&update.seed, update.round, 2, &update.provisioners);
        let mut tally = VoteTally::new(&committee, &update, 2);

        let mut msg = vote_from(&keys[0], &update, 2, hash);
        // Claim a different hash without re-signing.
        msg.header.block_hash = Hash::sha3(b"other");
        assert!(tally.add(&msg).is_none());
        assert_eq!(tally.weight_for(&Hash::sha3(b"other")), 0);
    }

    #[test]
    fn matching_phases_emit_exactly_one_agreement() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"candidate");
        let reducer = Reducer::new(keys[0].clone(), Arc::new(EventBus::new()));

        let first = phase_result(&keys, &update, 2, hash);
        let second = phase_result(&keys, &update, 3, hash);
        let agreement = reducer.agreement_from(&update, &first, &second);

        let agreement = agreement.expect("reduction succeeded");
        assert_eq!(agreement.header.block_hash, hash);
        assert_eq!(agreement.votes.len(), 2);
        assert_eq!(agreement.votes[0].step, 2);
        assert_eq!(agreement.votes[1].step, 3);
    }

    #[test]
    fn mismatched_phases_emit_nothing() {
        let (keys, update) = fixture(4);
        let reducer = Reducer::new(keys[0].clone(), Arc::new(EventBus::new()));

        let first = phase_result(&keys, &update, 2, Hash::sha3(b"a"));
        let second = phase_result(&keys, &update, 3, Hash::sha3(b"b"));
        assert!(reducer.agreement_from(&update, &first, &second).is_none());

        // A nil phase also yields nothing.
        let nil = PhaseResult::nil(3);
        assert!(reducer.agreement_from(&update, &first, &nil).is_none());
    }

    #[tokio::test]
    async fn run_phase_times_out_to_nil() {
        let (keys, update) = fixture(2);
        let reducer = Reducer::new(keys[0].clone(), Arc::new(EventBus::new()));
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        // Committee of two needs quorum 2; only our own vote arrives.
        let result = reducer
            .run_phase(
                &update,
                2,
                Hash::sha3(b"candidate"),
                Duration::from_millis(50),
                &mut rx,
                &cancel,
            )
            .await;
        assert!(result.is_nil());
    }

    #[tokio::test]
    async fn run_phase_collects_to_quorum() {
        let (keys, update) = fixture(3);
        let reducer = Reducer::new(keys[0].clone(), Arc::new(EventBus::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let hash = Hash::sha3(b"candidate");

        for nk in &keys[1..] {
            tx.send(vote_from(nk, &update, 2, hash)).unwrap();
        }

        let result = reducer
            .run_phase(&update, 2, hash, Duration::from_secs(5), &mut rx, &cancel)
            .await;
        assert_eq!(result.hash, hash);
        assert!(result.weight >= 3);
    }
}
