//! Frame routing.
//!
//! One processor instance serves every session. Gossiped topics pass
//! through per-topic dedup filters; fresh messages are re-published on the
//! process-wide gossip stream and delivered to their bus topic, duplicates
//! die here. Request topics produce response frames queued back to the
//! source peer. Unknown topics are dropped silently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use umbra_bus::{EventBus, RpcBus};
use umbra_storage::Database;
use umbra_wire::{
    DedupFilter, Frame, Freshness, InvMessage, InvType, Payload, RpcCall, RpcReply, Topic,
};

/// Deadline for bus-backed request handling.
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Cap on blocks served per `GetBlocks` request.
const MAX_BLOCKS_PER_REQUEST: usize = 500;

/// Routes decoded frames to handlers by topic.
pub struct MessageProcessor {
    event_bus: Arc<EventBus>,
    rpc_bus: Arc<RpcBus>,
    db: Arc<Database>,
    dedup: HashMap<Topic, DedupFilter>,
}

impl MessageProcessor {
    /// A processor over the buses and the chain store.
    pub fn new(event_bus: Arc<EventBus>, rpc_bus: Arc<RpcBus>, db: Arc<Database>) -> Self {
        let mut dedup = HashMap::new();
        for topic in [
            Topic::Tx,
            Topic::Block,
            Topic::Candidate,
            Topic::Score,
            Topic::Reduction,
            Topic::Agreement,
        ] {
            dedup.insert(topic, DedupFilter::with_default_ttl());
        }
        Self {
            event_bus,
            rpc_bus,
            db,
            dedup,
        }
    }

    /// Handle one frame; returns the frames to queue back to the sender.
    ///
    /// Safe to call concurrently for different frames.
    pub async fn handle(&self, frame: Frame) -> Vec<Frame> {
        let topic = frame.topic;
        let payload = match Payload::decode(topic, &frame.payload) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(topic = %topic, error = %e, "undecodable payload dropped");
                return Vec::new();
            }
        };

        match payload {
            Payload::Ping => vec![self.frame_or_skip(Payload::Pong)],
            Payload::Pong => Vec::new(),

            Payload::GetData(inv) => self.on_get_data(inv).await,
            Payload::Inv(inv) => self.on_inv(inv).await,
            Payload::GetBlocks(locators) => self.on_get_blocks(locators),
            Payload::MemPool => self.on_mempool_request().await,
            Payload::GetCandidate(hash) => {
                match self
                    .rpc_bus
                    .call(RpcCall::GetCandidate(hash), RPC_TIMEOUT)
                    .await
                {
                    Ok(RpcReply::Candidate(block)) => {
                        vec![self.frame_or_skip(Payload::Block(block))]
                    }
                    _ => Vec::new(),
                }
            }

            // Gossiped topics: dedup, deliver locally, re-publish.
            payload @ (Payload::Tx(_)
            | Payload::Block(_)
            | Payload::Candidate(_)
            | Payload::Score(_)
            | Payload::Reduction(_)
            | Payload::Agreement(_)) => {
                self.on_gossip(topic, payload, frame).await;
                Vec::new()
            }

            // Handshake frames are the session's business; everything else
            // has no wire handler.
            other => {
                trace!(topic = %other.topic(), "no handler for topic");
                Vec::new()
            }
        }
    }

    async fn on_gossip(&self, topic: Topic, payload: Payload, frame: Frame) {
        if let Some(filter) = self.dedup.get(&topic) {
            if filter.check_and_set(payload.content_hash()) == Freshness::Duplicate {
                trace!(topic = %topic, "duplicate gossip suppressed");
                return;
            }
        }

        match payload {
            // Transactions feed the mempool instead of the bus; the pool
            // decides whether to re-propagate.
            Payload::Tx(tx) => {
                match self
                    .rpc_bus
                    .call(RpcCall::SendMempoolTx(tx), RPC_TIMEOUT)
                    .await
                {
                    Ok(_) => {}
                    Err(e) => trace!(error = %e, "gossiped tx not pooled"),
                }
            }
            other => {
                // Deliver to the local subscriber(s) for this topic, then
                // re-publish to keep the flood going.
                self.event_bus.publish(topic, other);
                self.event_bus.publish(Topic::Gossip, Payload::Gossip(frame));
            }
        }
    }

    /// Serve inventory items from the store or the pool.
    async fn on_get_data(&self, inv: InvMessage) -> Vec<Frame> {
        let mut responses = Vec::new();

        for hash in inv.hashes_of(InvType::Block) {
            match self.db.fetch_block(&hash) {
                Ok(Some(block)) => {
                    responses.push(self.frame_or_skip(Payload::Block(Box::new(block))));
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "block fetch failed"),
            }
        }

        for hash in inv.hashes_of(InvType::MempoolTx) {
            match self
                .rpc_bus
                .call(RpcCall::GetMempoolTxs { filter: Some(hash) }, RPC_TIMEOUT)
                .await
            {
                Ok(RpcReply::Txs(txs)) => {
                    responses.extend(txs.into_iter().map(|tx| self.frame_or_skip(Payload::Tx(tx))));
                }
                Ok(_) => {}
                Err(e) => trace!(error = %e, "mempool lookup failed"),
            }
        }

        responses
    }

    /// Request whatever the advertisement covers that we do not hold.
    async fn on_inv(&self, inv: InvMessage) -> Vec<Frame> {
        let mut missing = InvMessage::new();

        for hash in inv.hashes_of(InvType::Block) {
            if !self.db.block_exists(&hash).unwrap_or(false) {
                missing.add(InvType::Block, hash);
            }
        }

        for hash in inv.hashes_of(InvType::MempoolTx) {
            let pooled = matches!(
                self.rpc_bus
                    .call(RpcCall::GetMempoolTxs { filter: Some(hash) }, RPC_TIMEOUT)
                    .await,
                Ok(RpcReply::Txs(txs)) if !txs.is_empty()
            );
            let stored = self
                .db
                .fetch_tx_location(&hash)
                .ok()
                .flatten()
                .is_some();
            if !pooled && !stored {
                missing.add(InvType::MempoolTx, hash);
            }
        }

        if missing.items.is_empty() {
            Vec::new()
        } else {
            vec![self.frame_or_skip(Payload::GetData(missing))]
        }
    }

    /// Serve up to [`MAX_BLOCKS_PER_REQUEST`] successors of the best known
    /// locator.
    fn on_get_blocks(&self, locators: Vec<umbra_types::Hash>) -> Vec<Frame> {
        for locator in locators {
            match self.db.successors(&locator, MAX_BLOCKS_PER_REQUEST) {
                Ok(blocks) if !blocks.is_empty() => {
                    return blocks
                        .into_iter()
                        .map(|b| self.frame_or_skip(Payload::Block(Box::new(b))))
                        .collect();
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "locator walk failed");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// Advertise our whole verified pool.
    async fn on_mempool_request(&self) -> Vec<Frame> {
        match self
            .rpc_bus
            .call(RpcCall::GetMempoolTxs { filter: None }, RPC_TIMEOUT)
            .await
        {
            Ok(RpcReply::Txs(txs)) => {
                if txs.is_empty() {
                    return Vec::new();
                }
                let mut inv = InvMessage::new();
                for tx in txs {
                    inv.add(InvType::MempoolTx, tx.hash());
                }
                vec![self.frame_or_skip(Payload::Inv(inv))]
            }
            _ => Vec::new(),
        }
    }

    fn frame_or_skip(&self, payload: Payload) -> Frame {
        payload
            .to_frame()
            .unwrap_or_else(|_| Frame::new(Topic::Reject, Vec::new()))
    }
}
