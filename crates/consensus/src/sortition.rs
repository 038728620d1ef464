//! Deterministic committee selection from the stake distribution.
//!
//! Every slot is drawn from `Sha3-256(seed || round || step || slot ||
//! draw)` reduced modulo the total active stake and mapped onto the member
//! whose cumulative stake covers the value. The `draw` counter performs
//! rejection sampling so the modulo reduction is unbiased. With a fixed
//! `(seed, round, step, provisioners)` the committee is byte-identical
//! across nodes.

use std::collections::BTreeMap;

use umbra_crypto::hash::sha3_256_multi;
use umbra_types::{Provisioners, PublicKeyBytes, Seed};

/// Target number of committee slots.
pub const COMMITTEE_SIZE: usize = 64;

/// Quorum for a committee: `ceil(0.75 * committee_size)`.
pub fn quorum(committee_size: usize) -> usize {
    (committee_size * 3).div_ceil(4)
}

/// A committee for one `(round, step)`: members with their slot counts.
///
/// A member may hold several slots; its vote weight is its slot count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committee {
    slots: BTreeMap<PublicKeyBytes, usize>,
    size: usize,
}

impl Committee {
    /// Draw the committee for `(round, step)` from the active stake table.
    pub fn deterministic(
        seed: &Seed,
        round: u64,
        step: u8,
        provisioners: &Provisioners,
    ) -> Committee {
        let active = provisioners.active_at(round);
        let total_stake = provisioners.total_weight_at(round);
        if active.is_empty() || total_stake == 0 {
            return Committee {
                slots: BTreeMap::new(),
                size: 0,
            };
        }

        // Fewer members than target slots shrinks the committee, it never
        // inflates a single member into a quorum of one slot each.
        let size = COMMITTEE_SIZE.min(active.len());

        let mut slots: BTreeMap<PublicKeyBytes, usize> = BTreeMap::new();
        for slot in 0..size as u32 {
            let value = draw_value(seed, round, step, slot, total_stake);

            // Walk the cumulative stake in key order.
            let mut cumulative = 0u64;
            for member in &active {
                cumulative += member.weight_at(round);
                if value < cumulative {
                    *slots.entry(member.bls_key).or_default() += 1;
                    break;
                }
            }
        }

        Committee { slots, size }
    }

    /// Slot count (vote weight) of a member.
    pub fn votes_for(&self, key: &PublicKeyBytes) -> usize {
        self.slots.get(key).copied().unwrap_or(0)
    }

    /// Whether a key holds at least one slot.
    pub fn is_member(&self, key: &PublicKeyBytes) -> bool {
        self.slots.contains_key(key)
    }

    /// Total slot count.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Quorum threshold for this committee.
    pub fn quorum(&self) -> usize {
        quorum(self.size)
    }

    /// Members and their slot counts, in key order.
    pub fn members(&self) -> impl Iterator<Item = (&PublicKeyBytes, usize)> {
        self.slots.iter().map(|(k, v)| (k, *v))
    }

    /// Sum of all assigned slots; equals [`Committee::size`] by
    /// construction.
    pub fn total_votes(&self) -> usize {
        self.slots.values().sum()
    }
}

fn draw_value(seed: &Seed, round: u64, step: u8, slot: u32, total_stake: u64) -> u64 {
    // Reject digests that would bias the modulo reduction.
    let zone = u64::MAX - (u64::MAX % total_stake);
    let mut draw = 0u32;
    loop {
        let digest = sha3_256_multi(&[
            seed.as_bytes(),
            &round.to_le_bytes(),
            &[step],
            &slot.to_le_bytes(),
            &draw.to_le_bytes(),
        ]);
        let value = u64::from_le_bytes(digest[..8].try_into().expect("8-byte slice"));
        if value < zone {
            return value % total_stake;
        }
        draw += 1;
    }
}
