//! Round state: the round/step clock, the score threshold and the
//! per-round snapshot.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;

use umbra_types::{BidList, BlockHeader, Hash, Provisioners, Seed};

/// The shared round/step clock.
///
/// Cheap to clone; all consensus components of a node observe the same
/// clock. Only the coordinator advances it.
#[derive(Clone)]
pub struct State {
    inner: Arc<RwLock<(u64, u8)>>,
}

impl State {
    /// A clock starting at `(round, 1)`.
    pub fn new(round: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new((round, 1))),
        }
    }

    /// Current round.
    pub fn round(&self) -> u64 {
        self.inner.read().0
    }

    /// Current step.
    pub fn step(&self) -> u8 {
        self.inner.read().1
    }

    /// Current `(round, step)`.
    pub fn position(&self) -> (u64, u8) {
        *self.inner.read()
    }

    /// Compare an event position against the clock.
    ///
    /// Returns `(round ordering, step ordering)` of the event relative to
    /// now: `Less` means stale, `Greater` means early.
    pub fn cmp(&self, round: u64, step: u8) -> (Ordering, Ordering) {
        let (current_round, current_step) = self.position();
        (round.cmp(&current_round), step.cmp(&current_step))
    }

    /// Advance to a new round, resetting the step to 1.
    pub fn update_round(&self, round: u64) {
        *self.inner.write() = (round, 1);
    }

    /// Advance the step within the round.
    pub fn increment_step(&self) {
        let mut inner = self.inner.write();
        inner.1 = inner.1.saturating_add(1);
    }

    /// Jump the clock to an explicit step.
    pub fn set_step(&self, step: u8) {
        self.inner.write().1 = step;
    }
}

/// The dynamic score threshold.
///
/// A generated score must beat the threshold to produce a candidate. The
/// threshold halves after every failed attempt within a round, so a round
/// with few strong bidders still converges on a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Threshold {
    limit: [u8; 32],
}

impl Threshold {
    /// The per-round starting threshold.
    pub fn new() -> Self {
        let mut limit = [0u8; 32];
        limit[0] = 0x80;
        Self { limit }
    }

    /// Whether the threshold still exceeds (or equals) the score, meaning
    /// the score loses.
    pub fn exceeds(&self, score: &Hash) -> bool {
        self.limit >= *score.as_bytes()
    }

    /// Halve the threshold (big-endian right shift by one bit).
    pub fn lower(&mut self) {
        let mut carry = 0u8;
        for byte in self.limit.iter_mut() {
            let new_carry = *byte & 1;
            *byte = (*byte >> 1) | (carry << 7);
            carry = new_carry;
        }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot a round's components are created from.
///
/// Produced only by the acceptor, when a block is accepted.
#[derive(Debug, Clone)]
pub struct RoundUpdate {
    /// The round being decided (tip height + 1)
    pub round: u64,
    /// Provisioner set after the accepted block
    pub provisioners: Arc<Provisioners>,
    /// Known bids
    pub bids: BidList,
    /// This round's seed
    pub seed: Seed,
    /// The accepted tip header
    pub tip: BlockHeader,
}

impl RoundUpdate {
    /// Hash of the chain tip this round extends.
    pub fn last_hash(&self) -> Hash {
        self.tip.hash()
    }

    /// Timestamp of the chain tip.
    pub fn last_timestamp(&self) -> i64 {
        self.tip.timestamp
    }
}
