//! The verified-entry pool.

use std::collections::HashMap;
use std::time::Instant;

use umbra_types::{CallType, ContractCall, Hash, MerkleTree};

/// A pooled transaction with its bookkeeping.
#[derive(Debug, Clone)]
pub struct TxDesc {
    /// The verified transaction
    pub tx: ContractCall,
    /// When the transaction arrived
    pub received_at: Instant,
    /// When verification completed
    pub verified_at: Option<Instant>,
    /// Encoded size in bytes
    pub size: usize,
    /// Remaining kadcast propagation height
    pub kad_height: u8,
}

impl TxDesc {
    /// Wrap a transaction received now.
    pub fn new(tx: ContractCall, kad_height: u8) -> Self {
        let size = tx.size();
        Self {
            tx,
            received_at: Instant::now(),
            verified_at: None,
            size,
            kad_height,
        }
    }

    /// The transaction hash.
    pub fn hash(&self) -> Hash {
        self.tx.hash()
    }
}

/// Map of verified transactions with fee-ordered views.
#[derive(Debug, Default)]
pub struct Pool {
    entries: HashMap<Hash, TxDesc>,
    total_bytes: usize,
}

impl Pool {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transaction with this hash is pooled.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Insert an entry. The caller has already checked for duplicates.
    pub fn put(&mut self, desc: TxDesc) {
        self.total_bytes += desc.size;
        self.entries.insert(desc.hash(), desc);
    }

    /// Fetch a transaction by hash.
    pub fn get(&self, hash: &Hash) -> Option<&TxDesc> {
        self.entries.get(hash)
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total encoded size of all entries.
    pub fn size_bytes(&self) -> usize {
        self.total_bytes
    }

    /// All entries, highest fee-per-byte first.
    ///
    /// Ties break on hash so the order is deterministic across nodes.
    pub fn sorted_by_fee(&self) -> Vec<&TxDesc> {
        let mut entries: Vec<&TxDesc> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            b.tx.fee_per_byte()
                .cmp(&a.tx.fee_per_byte())
                .then_with(|| a.hash().cmp(&b.hash()))
        });
        entries
    }

    /// Highest-fee transactions whose total encoded size fits `max_bytes`.
    pub fn sorted_up_to(&self, max_bytes: usize) -> Vec<ContractCall> {
        let mut out = Vec::new();
        let mut total = 0usize;
        for desc in self.sorted_by_fee() {
            if total + desc.size > max_bytes {
                break;
            }
            total += desc.size;
            out.push(desc.tx.clone());
        }
        out
    }

    /// All pooled transactions of a given type.
    pub fn filter_by_type(&self, call_type: CallType) -> Vec<ContractCall> {
        self.entries
            .values()
            .filter(|d| d.tx.call_type() == call_type)
            .map(|d| d.tx.clone())
            .collect()
    }

    /// Clone out every pooled transaction.
    pub fn calls(&self) -> Vec<ContractCall> {
        self.entries.values().map(|d| d.tx.clone()).collect()
    }

    /// Rebuild the pool against an accepted block's Merkle tree.
    ///
    /// Entries proven present in the tree are evicted; survivors stay
    /// available for the next round. Returns the number evicted.
    pub fn evict_included(&mut self, tree: &MerkleTree) -> usize {
        let before = self.entries.len();
        let mut survivors = HashMap::with_capacity(before);
        let mut total_bytes = 0usize;

        for (hash, desc) in self.entries.drain() {
            if !tree.verify_inclusion(&hash) {
                total_bytes += desc.size;
                survivors.insert(hash, desc);
            }
        }

        self.entries = survivors;
        self.total_bytes = total_bytes;
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::transaction::Transfer;

    fn tx(fee: u64, tag: u8) -> ContractCall {
        ContractCall::Transfer(Transfer {
            fee,
            nullifiers: vec![Hash::sha3(&[tag])],
            outputs: vec![],
            proof: vec![0u8; 16],
        })
    }

    #[test]
    fn fee_ordering_is_descending_per_byte() {
        let mut pool = Pool::new();
        // Same shape, so size is equal and fee dominates ordering.
        pool.put(TxDesc::new(tx(9_000, 1), 0));
        pool.put(TxDesc::new(tx(90_000, 2), 0));
        pool.put(TxDesc::new(tx(900, 3), 0));

        let fees: Vec<u64> = pool.sorted_by_fee().iter().map(|d| d.tx.fee()).collect();
        assert_eq!(fees, vec![90_000, 9_000, 900]);
    }

    #[test]
    fn sorted_up_to_respects_budget() {
        let mut pool = Pool::new();
        for i in 0..5u8 {
            pool.put(TxDesc::new(tx(10_000 * (i as u64 + 1), i), 0));
        }
        let one_size = pool.sorted_by_fee()[0].size;

        let picked = pool.sorted_up_to(one_size * 2 + 1);
        assert_eq!(picked.len(), 2);
        assert!(picked[0].fee() >= picked[1].fee());

        assert!(pool.sorted_up_to(one_size - 1).is_empty());
    }

    #[test]
    fn eviction_drops_only_included() {
        let mut pool = Pool::new();
        let included = tx(100, 1);
        let survivor = tx(200, 2);
        pool.put(TxDesc::new(included.clone(), 0));
        pool.put(TxDesc::new(survivor.clone(), 0));

        let tree = MerkleTree::build(&[included.hash(), Hash::sha3(b"other")]);
        let evicted = pool.evict_included(&tree);

        assert_eq!(evicted, 1);
        assert!(!pool.contains(&included.hash()));
        assert!(pool.contains(&survivor.hash()));
        assert_eq!(pool.size_bytes(), pool.get(&survivor.hash()).unwrap().size);
    }
}
