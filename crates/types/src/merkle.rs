//! Binary Merkle tree over contract-call hashes.
//!
//! The mempool proves presence of its entries in an accepted block by
//! rebuilding this tree and checking inclusion, so eviction cannot be fooled
//! by a header that merely lists a hash.

use sha3::{Digest, Sha3_256};

use crate::hash::Hash;

/// Merkle root over a list of leaf hashes.
///
/// Empty input yields [`Hash::NIL`]. An odd level duplicates its last node.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    MerkleTree::build(leaves).root()
}

/// A fully materialized binary Merkle tree.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    // levels[0] is the leaf level; the last level holds the root.
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Build a tree from leaf hashes.
    pub fn build(leaves: &[Hash]) -> Self {
        if leaves.is_empty() {
            return Self { levels: Vec::new() };
        }

        let mut levels = vec![leaves.to_vec()];
        while levels.last().map(|l| l.len() > 1).unwrap_or(false) {
            let current = levels.last().expect("non-empty by construction");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = pair[0];
                let right = if pair.len() == 2 { pair[1] } else { pair[0] };
                next.push(hash_pair(&left, &right));
            }
            levels.push(next);
        }
        Self { levels }
    }

    /// The tree root, or [`Hash::NIL`] for an empty tree.
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(Hash::NIL)
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Verify that `leaf` is included in the tree by recomputing its path
    /// to the root.
    pub fn verify_inclusion(&self, leaf: &Hash) -> bool {
        let leaves = match self.levels.first() {
            Some(l) => l,
            None => return false,
        };
        let mut index = match leaves.iter().position(|h| h == leaf) {
            Some(i) => i,
            None => return false,
        };

        let mut acc = *leaf;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = index ^ 1;
            let sibling = level.get(sibling_index).copied().unwrap_or(level[index]);
            acc = if index % 2 == 0 {
                hash_pair(&acc, &sibling)
            } else {
                hash_pair(&sibling, &acc)
            };
            index /= 2;
        }
        acc == self.root()
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash::from_bytes(hasher.finalize().into())
}
