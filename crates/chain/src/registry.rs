//! The shared chain registry.
//!
//! Global mutable chain state (tip, provisioners, bid list, candidate
//! store) lives behind one reader-writer lock. Everyone may read; writing
//! requires the [`RegistryWriter`] capability, which is created exactly
//! once and handed to the acceptor.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use umbra_types::{BidList, Block, BlockHeader, Hash, Provisioners};

struct Inner {
    tip: Block,
    provisioners: Arc<Provisioners>,
    bids: BidList,
    candidates: HashMap<Hash, Block>,
    // Highest height advertised by peers, for sync progress.
    sync_target: u64,
}

/// Read access to the chain's shared state.
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    /// Create the registry and its single write handle.
    pub fn create(
        genesis: Block,
        provisioners: Provisioners,
        bids: BidList,
    ) -> (Arc<Registry>, RegistryWriter) {
        let registry = Arc::new(Registry {
            inner: RwLock::new(Inner {
                tip: genesis,
                provisioners: Arc::new(provisioners),
                bids,
                candidates: HashMap::new(),
                sync_target: 0,
            }),
        });
        let writer = RegistryWriter {
            registry: Arc::clone(&registry),
        };
        (registry, writer)
    }

    /// The current tip block.
    pub fn tip(&self) -> Block {
        self.inner.read().tip.clone()
    }

    /// The current tip header.
    pub fn tip_header(&self) -> BlockHeader {
        self.inner.read().tip.header.clone()
    }

    /// The current tip height.
    pub fn tip_height(&self) -> u64 {
        self.inner.read().tip.header.height
    }

    /// The current provisioner set.
    pub fn provisioners(&self) -> Arc<Provisioners> {
        Arc::clone(&self.inner.read().provisioners)
    }

    /// The current bid list.
    pub fn bids(&self) -> BidList {
        self.inner.read().bids.clone()
    }

    /// A stored candidate block.
    pub fn candidate(&self, hash: &Hash) -> Option<Block> {
        self.inner.read().candidates.get(hash).cloned()
    }

    /// Number of stored candidates.
    pub fn candidate_count(&self) -> usize {
        self.inner.read().candidates.len()
    }

    /// Sync progress as a fraction of the highest advertised height.
    pub fn sync_progress(&self) -> f32 {
        let inner = self.inner.read();
        if inner.sync_target <= inner.tip.header.height {
            return 1.0;
        }
        inner.tip.header.height as f32 / inner.sync_target as f32
    }
}

/// The sole write capability over the registry.
///
/// Not cloneable; the acceptor owns it.
pub struct RegistryWriter {
    registry: Arc<Registry>,
}

impl RegistryWriter {
    /// Read side of the registry this writer mutates.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Advance the tip and replace the provisioner set and bid list.
    pub fn advance(&self, tip: Block, provisioners: Arc<Provisioners>, bids: BidList) {
        let mut inner = self.registry.inner.write();
        let height = tip.header.height;
        inner.tip = tip;
        inner.provisioners = provisioners;
        inner.bids = bids;
        // Candidates of decided heights are garbage.
        inner.candidates.retain(|_, block| block.header.height > height);
    }

    /// Store a candidate block for later acceptance.
    pub fn store_candidate(&self, block: Block) {
        self.registry.inner.write().candidates.insert(block.hash(), block);
    }

    /// Record the highest height peers advertise.
    pub fn observe_remote_height(&self, height: u64) {
        let mut inner = self.registry.inner.write();
        if height > inner.sync_target {
            inner.sync_target = height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u64) -> Block {
        Block::new(
            BlockHeader {
                height,
                timestamp: height as i64,
                ..Default::default()
            },
            vec![],
        )
    }

    #[test]
    fn advance_replaces_tip_and_prunes_candidates() {
        let (registry, writer) = Registry::create(block(0), Provisioners::new(), BidList::new());

        writer.store_candidate(block(1));
        writer.store_candidate(block(2));
        assert_eq!(registry.candidate_count(), 2);

        writer.advance(block(1), Arc::new(Provisioners::new()), BidList::new());
        assert_eq!(registry.tip_height(), 1);
        // Only the height-2 candidate survives.
        assert_eq!(registry.candidate_count(), 1);
        assert!(registry.candidate(&block(2).hash()).is_some());
    }

    #[test]
    fn sync_progress_saturates_at_one() {
        let (registry, writer) = Registry::create(block(0), Provisioners::new(), BidList::new());
        assert_eq!(registry.sync_progress(), 1.0);

        writer.observe_remote_height(4);
        writer.advance(block(1), Arc::new(Provisioners::new()), BidList::new());
        assert!((registry.sync_progress() - 0.25).abs() < f32::EPSILON);

        for h in 2..=4 {
            writer.advance(block(h), Arc::new(Provisioners::new()), BidList::new());
        }
        assert_eq!(registry.sync_progress(), 1.0);
    }
}
