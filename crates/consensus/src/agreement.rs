//! Agreement accumulation.
//!
//! Every verified agreement contributes its sender's sortition weight to a
//! per-hash bucket. When a bucket crosses quorum the accumulator folds the
//! winning agreement's vote sets into a certificate and the round is
//! decided. The accumulator is per-round but persists across steps, so
//! agreements landing late (from earlier or later steps of the same round)
//! still aggregate.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, trace, warn};

use umbra_crypto::bls::{BlsPublicKey, BlsSignature};
use umbra_crypto::ed25519::{EdPublicKey, EdSignature};
use umbra_types::{Certificate, Hash, PublicKeyBytes};
use umbra_wire::{AgreementMessage, StepVotes};

use crate::sortition::Committee;
use crate::state::RoundUpdate;

/// A certificate for a decided round.
#[derive(Debug, Clone)]
pub struct WinningCertificate {
    /// The round that was decided
    pub round: u64,
    /// The winning block hash
    pub hash: Hash,
    /// Aggregated proof of the decision
    pub certificate: Certificate,
}

struct Bucket {
    weight: usize,
    senders: HashSet<PublicKeyBytes>,
}

/// Collects agreements for one round and detects quorum.
pub struct AgreementAccumulator {
    update: RoundUpdate,
    committees: HashMap<u8, Committee>,
    buckets: HashMap<Hash, Bucket>,
    decided: bool,
}

impl AgreementAccumulator {
    /// An accumulator for the round described by `update`.
    pub fn new(update: RoundUpdate) -> Self {
        Self {
            update,
            committees: HashMap::new(),
            buckets: HashMap::new(),
            decided: false,
        }
    }

    fn committee(&mut self, step: u8) -> &Committee {
        let update = &self.update;
        self.committees.entry(step).or_insert_with(|| {
            Committee::deterministic(&update.seed, update.round, step, &update.provisioners)
        })
    }

    /// Process one agreement; returns the certificate when this message
    /// completes a quorum.
    ///
    /// Emits at most one certificate per round.
    pub fn process(&mut self, msg: AgreementMessage) -> Option<WinningCertificate> {
        if self.decided {
            return None;
        }
        if let Err(reason) = self.verify(&msg) {
            trace!(round = self.update.round, reason, "agreement discarded");
            return None;
        }

        let weight = self.committee(msg.header.step).votes_for(&msg.header.sender);
        if weight == 0 {
            trace!(sender = ?msg.header.sender, "agreement from non-member");
            return None;
        }

        let hash = msg.header.block_hash;
        let bucket = self.buckets.entry(hash).or_insert_with(|| Bucket {
            weight: 0,
            senders: HashSet::new(),
        });
        if !bucket.senders.insert(msg.header.sender) {
            return None;
        }
        bucket.weight += weight;

        let quorum = self.committee(msg.header.step).quorum();
        debug!(
            round = msg.header.round,
            step = msg.header.step,
            hash = %hash,
            weight = self.buckets[&hash].weight,
            quorum,
            "agreement accumulated"
        );

        if self.buckets[&hash].weight < quorum {
            return None;
        }

        let certificate = certificate_from(&msg.votes)?;
        self.decided = true;
        info!(round = self.update.round, hash = %hash, "round decided");
        Some(WinningCertificate {
            round: self.update.round,
            hash,
            certificate,
        })
    }

    /// Envelope, membership and vote-set verification.
    fn verify(&mut self, msg: &AgreementMessage) -> Result<(), &'static str> {
        if msg.header.round != self.update.round {
            return Err("wrong round");
        }
        if msg.prev_hash != self.update.last_hash() {
            return Err("wrong chain tip");
        }
        if msg.votes.len() != 2 {
            return Err("malformed vote sets");
        }

        let provisioner = self
            .update
            .provisioners
            .get(&msg.header.sender)
            .ok_or("unknown sender")?;
        if !provisioner.active_at(self.update.round) {
            return Err("sender inactive this round");
        }
        if provisioner.ed_key != msg.ed_key {
            return Err("envelope key mismatch");
        }

        let ed_key = EdPublicKey::from_bytes(&msg.ed_key).map_err(|_| "bad envelope key")?;
        let ed_sig = EdSignature::from_bytes(msg.ed_signature.as_bytes());
        if !ed_key.verify(&msg.envelope_bytes(), &ed_sig) {
            warn!(sender = ?msg.header.sender, "bad agreement envelope");
            return Err("bad envelope signature");
        }

        for votes in &msg.votes {
            self.verify_step_votes(votes, &msg.header.block_hash)?;
        }
        Ok(())
    }

    fn verify_step_votes(&mut self, votes: &StepVotes, hash: &Hash) -> Result<(), &'static str> {
        if votes.voters.is_empty() {
            return Err("empty vote set");
        }

        let committee = self.committee(votes.step).clone();
        let mut keys = Vec::with_capacity(votes.voters.len());
        for voter in &votes.voters {
            if !committee.is_member(voter) {
                return Err("voter outside step committee");
            }
            keys.push(BlsPublicKey::from_bytes(voter.as_bytes()).map_err(|_| "bad voter key")?);
        }

        let signature =
            BlsSignature::from_bytes(votes.signature.as_bytes()).map_err(|_| "bad vote sig")?;
        let refs: Vec<&BlsPublicKey> = keys.iter().collect();
        if !signature.verify_aggregate(hash.as_bytes(), &refs) {
            return Err("aggregate verification failed");
        }
        Ok(())
    }
}

/// Fold an agreement's two vote sets into a certificate.
fn certificate_from(votes: &[StepVotes]) -> Option<Certificate> {
    let (first, second) = (votes.first()?, votes.get(1)?);
    Some(Certificate {
        step: second.step,
        signature: second.signature,
        keys: second.voters.clone(),
        first_step: first.step,
        first_signature: first.signature,
        first_keys: first.voters.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reduction::{PhaseResult, Reducer};
    use std::sync::Arc;
    use umbra_bus::EventBus;
    use umbra_crypto::NodeKeys;
    use umbra_types::{BlockHeader, BlsSignatureBytes, Provisioners, Seed, Stake};

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

    /// Votes from every member for `hash` at `step`.
    fn full_phase(keys: &[NodeKeys], update: &RoundUpdate, step: u8, hash: Hash) -> PhaseResult {
        let votes: Vec<(PublicKeyBytes, BlsSignatureBytes)> = keys
            .iter()
            .map(|nk| {
                (
                    PublicKeyBytes(nk.bls_public.to_bytes()),
                    BlsSignatureBytes(nk.bls_secret.sign(hash.as_bytes()).to_bytes()),
                )
            })
            .collect();
        PhaseResult {
            hash,
            step,
            weight: votes.len(),
            votes,
        }
    }

    fn agreement_for(
        signer: &NodeKeys,
        keys: &[NodeKeys],
        update: &RoundUpdate,
        hash: Hash,
    ) -> AgreementMessage {
        let reducer = Reducer::new(signer.clone(), Arc::new(EventBus::new()));
        let first = full_phase(keys, update, 2, hash);
        let second = full_phase(keys, update, 3, hash);
        reducer
            .agreement_from(update, &first, &second)
            .expect("phases match")
    }

    #[test]
    fn quorum_of_agreements_yields_one_certificate() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"winner");
        let mut accumulator = AgreementAccumulator::new(update.clone());

        let mut certificates = Vec::new();
        for signer in &keys {
            let msg = agreement_for(signer, &keys, &update, hash);
            if let Some(cert) = accumulator.process(msg) {
                certificates.push(cert);
            }
        }

        assert_eq!(certificates.len(), 1, "exactly one certificate per round");
        let winning = &certificates[0];
        assert_eq!(winning.hash, hash);
        assert_eq!(winning.round, 1);
        assert_eq!(winning.certificate.keys.len(), keys.len());
        assert_eq!(winning.certificate.first_keys.len(), keys.len());
        assert_ne!(winning.certificate.step, winning.certificate.first_step);
    }

    #[test]
    fn duplicate_sender_counts_once() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"winner");
        let mut accumulator = AgreementAccumulator::new(update.clone());

        let msg = agreement_for(&keys[0], &keys, &update, hash);
        assert!(accumulator.process(msg.clone()).is_none());
        assert!(accumulator.process(msg).is_none());
    }

    #[test]
    fn tampered_envelope_is_rejected() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"winner");
        let mut accumulator = AgreementAccumulator::new(update.clone());

        let mut msg = agreement_for(&keys[0], &keys, &update, hash);
        msg.header.block_hash = Hash::sha3(b"swapped");
        assert!(accumulator.process(msg).is_none());
    }

    #[test]
    fn corrupted_vote_set_is_rejected() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"winner");
        let mut accumulator = AgreementAccumulator::new(update.clone());

        let reducer = Reducer::new(keys[0].clone(), Arc::new(EventBus::new()));
        let first = full_phase(&keys, &update, 2, hash);
        // One contribution signs a different message.
        let mut second = full_phase(&keys, &update, 3, hash);
        second.votes[1].1 = BlsSignatureBytes(
            keys[1].bls_secret.sign(b"forged").to_bytes(),
        );
        let msg = reducer.agreement_from(&update, &first, &second).unwrap();
        assert!(accumulator.process(msg).is_none());
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let (keys, update) = fixture(4);
        let hash = Hash::sha3(b"winner");
        let mut accumulator = AgreementAccumulator::new(update.clone());

        let outsider = NodeKeys::from_seed(&[77; 32]).unwrap();
        let msg = agreement_for(&outsider, &keys, &update, hash);
        assert!(accumulator.process(msg).is_none());
    }
}
