//! Provisioners, stakes and bids.
//!
//! The provisioner set is the stake table sortition draws committees from.
//! It is keyed by BLS public key bytes and ordered on that encoding, so
//! iteration is deterministic across nodes, which sortition requires.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hash::Hash;
use crate::keys::PublicKeyBytes;

/// A single stake belonging to a provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    /// Locked amount
    pub amount: u64,
    /// First round at which the stake is active
    pub start_height: u64,
    /// Round at which the stake expires
    pub end_height: u64,
}

impl Stake {
    /// Whether this stake is active at `round` (`start <= round < end`).
    pub fn active_at(&self, round: u64) -> bool {
        self.start_height <= round && round < self.end_height
    }
}

/// A staker eligible to sit on reduction and agreement committees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    /// Ed25519 public key (message envelope identity)
    pub ed_key: [u8; 32],
    /// BLS public key (committee identity)
    pub bls_key: PublicKeyBytes,
    /// The provisioner's stakes
    pub stakes: Vec<Stake>,
}

impl Provisioner {
    /// A provisioner with a single stake.
    pub fn new(ed_key: [u8; 32], bls_key: PublicKeyBytes, stake: Stake) -> Self {
        Self {
            ed_key,
            bls_key,
            stakes: vec![stake],
        }
    }

    /// Whether any stake is active at `round`.
    pub fn active_at(&self, round: u64) -> bool {
        self.stakes.iter().any(|s| s.active_at(round))
    }

    /// Total active stake at `round`.
    pub fn weight_at(&self, round: u64) -> u64 {
        self.stakes
            .iter()
            .filter(|s| s.active_at(round))
            .map(|s| s.amount)
            .sum()
    }
}

/// The full provisioner set, ordered by BLS key bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioners {
    members: BTreeMap<PublicKeyBytes, Provisioner>,
}

impl Provisioners {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a provisioner.
    pub fn insert(&mut self, provisioner: Provisioner) {
        self.members.insert(provisioner.bls_key, provisioner);
    }

    /// Add a stake, creating the member if needed.
    pub fn add_stake(&mut self, ed_key: [u8; 32], bls_key: PublicKeyBytes, stake: Stake) {
        self.members
            .entry(bls_key)
            .and_modify(|p| p.stakes.push(stake))
            .or_insert_with(|| Provisioner::new(ed_key, bls_key, stake));
    }

    /// Look up a member by BLS key.
    pub fn get(&self, key: &PublicKeyBytes) -> Option<&Provisioner> {
        self.members.get(key)
    }

    /// Number of members, active or not.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members with active stake at `round`, in key order.
    pub fn active_at(&self, round: u64) -> Vec<&Provisioner> {
        self.members
            .values()
            .filter(|p| p.active_at(round))
            .collect()
    }

    /// Sum of active stake at `round`.
    pub fn total_weight_at(&self, round: u64) -> u64 {
        self.members.values().map(|p| p.weight_at(round)).sum()
    }

    /// Iterate all members in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Provisioner> {
        self.members.values()
    }
}

/// A blind-bid commitment making a node eligible to generate blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Bid value commitment `X`
    pub x: Hash,
    /// Bid commitment `M`
    pub m: Hash,
    /// Round at which the bid expires
    pub end_height: u64,
}

impl Bid {
    /// Whether the bid is active at `round` (`round < end`).
    pub fn active_at(&self, round: u64) -> bool {
        round < self.end_height
    }
}

/// The ordered list of known bids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidList {
    bids: Vec<Bid>,
}

impl BidList {
    /// An empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bid; its index is its position in arrival order.
    pub fn push(&mut self, bid: Bid) {
        self.bids.push(bid);
    }

    /// The stored index of a bid with commitment `m`, if present and active.
    pub fn index_of(&self, m: &Hash, round: u64) -> Option<u64> {
        self.bids
            .iter()
            .position(|b| &b.m == m && b.active_at(round))
            .map(|i| i as u64)
    }

    /// Bids active at `round`.
    pub fn active_at(&self, round: u64) -> Vec<&Bid> {
        self.bids.iter().filter(|b| b.active_at(round)).collect()
    }

    /// Drop expired bids.
    pub fn prune(&mut self, round: u64) {
        self.bids.retain(|b| b.active_at(round));
    }

    /// Number of bids, active or not.
    pub fn len(&self) -> usize {
        self.bids.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u8) -> PublicKeyBytes {
        PublicKeyBytes([i; 48])
    }

    #[test]
    fn stake_activity_window() {
        let stake = Stake {
            amount: 100,
            start_height: 10,
            end_height: 20,
        };
        assert!(!stake.active_at(9));
        assert!(stake.active_at(10));
        assert!(stake.active_at(19));
        assert!(!stake.active_at(20));
    }

    #[test]
    fn weights_sum_active_stakes_only() {
        let mut set = Provisioners::new();
        set.add_stake([1; 32], key(1), Stake { amount: 50, start_height: 0, end_height: 100 });
        set.add_stake([1; 32], key(1), Stake { amount: 25, start_height: 50, end_height: 60 });
        set.add_stake([2; 32], key(2), Stake { amount: 10, start_height: 0, end_height: 10 });

        assert_eq!(set.total_weight_at(5), 60);
        assert_eq!(set.total_weight_at(55), 75);
        assert_eq!(set.active_at(55).len(), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut set = Provisioners::new();
        for i in [3u8, 1, 2] {
            set.add_stake([i; 32], key(i), Stake { amount: 1, start_height: 0, end_height: 10 });
        }
        let order: Vec<u8> = set.iter().map(|p| p.bls_key.as_bytes()[0]).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn bid_index_skips_expired() {
        let mut bids = BidList::new();
        let m = Hash::sha3(b"m");
        bids.push(Bid { x: Hash::sha3(b"x"), m, end_height: 5 });
        assert_eq!(bids.index_of(&m, 4), Some(0));
        assert_eq!(bids.index_of(&m, 5), None);
    }
}
