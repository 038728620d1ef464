//! The mempool owner task.
//!
//! All mutation runs on a single task fed by bus channels; external callers
//! only ever post requests or take read views. The lifecycle loop mirrors
//! the pool's duties: serve requests, evict on accepted blocks, and run
//! housekeeping on an idle tick.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use umbra_bus::{EventBus, RpcBus, RpcRequest};
use umbra_oracle::Oracle;
use umbra_types::{Block, ContractCall, Hash, MerkleTree};
use umbra_wire::{InvMessage, InvType, Payload, RpcCall, RpcReply, Topic};

use crate::pool::{Pool, TxDesc};
use crate::{MempoolError, Result};

/// Initial kadcast propagation height for locally submitted transactions.
pub const KADCAST_INIT_HEIGHT: u8 = 128;

/// Mempool configuration.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Size alarm threshold in megabytes
    pub max_size_mb: usize,
    /// Re-propagate over kadcast instead of gossip inventory
    pub kadcast_enabled: bool,
    /// Housekeeping interval
    pub idle_interval: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 100,
            kadcast_enabled: false,
            idle_interval: Duration::from_secs(20),
        }
    }
}

/// The mempool service.
pub struct Mempool {
    pool: Arc<RwLock<Pool>>,
    oracle: Arc<dyn Oracle>,
    event_bus: Arc<EventBus>,
    config: MempoolConfig,
    latest_block_timestamp: RwLock<i64>,
}

impl Mempool {
    /// Build a mempool over the given oracle and bus.
    pub fn new(oracle: Arc<dyn Oracle>, event_bus: Arc<EventBus>, config: MempoolConfig) -> Self {
        info!(kadcast = config.kadcast_enabled, "creating mempool");
        Self {
            pool: Arc::new(RwLock::new(Pool::new())),
            oracle,
            event_bus,
            config,
            latest_block_timestamp: RwLock::new(i64::MIN),
        }
    }

    /// Shared read view of the pool.
    pub fn pool(&self) -> Arc<RwLock<Pool>> {
        Arc::clone(&self.pool)
    }

    /// Run the submitted transaction through the verification pipeline and
    /// pool it.
    ///
    /// Pipeline: coinbase rejection, duplicate rejection, oracle
    /// verification (covers double spends against chain and pool),
    /// insertion, re-propagation.
    pub async fn process_tx(&self, tx: ContractCall, kad_height: u8) -> Result<Hash> {
        let hash = tx.hash();

        if tx.is_coinbase() {
            return Err(MempoolError::CoinbaseNotAllowed);
        }
        if self.pool.read().contains(&hash) {
            return Err(MempoolError::AlreadyExists);
        }

        self.oracle.verify_transaction(&tx).await?;

        let mut desc = TxDesc::new(tx, kad_height);
        desc.verified_at = Some(std::time::Instant::now());
        self.pool.write().put(desc.clone());

        debug!(tx = %hash, size = desc.size, "transaction pooled");
        self.propagate(&desc, hash);
        Ok(hash)
    }

    /// Re-propagate over gossip inventory or kadcast, never both.
    fn propagate(&self, desc: &TxDesc, hash: Hash) {
        if self.config.kadcast_enabled {
            if desc.kad_height == 0 {
                // Leaf of the overlay; nothing left to relay.
                return;
            }
            match Payload::Tx(desc.tx.clone()).to_frame() {
                Ok(frame) => {
                    self.event_bus.publish(
                        Topic::Kadcast,
                        Payload::Kadcast {
                            height: desc.kad_height - 1,
                            frame,
                        },
                    );
                }
                Err(e) => warn!(tx = %hash, error = %e, "kadcast encode failed"),
            }
        } else {
            let mut inv = InvMessage::new();
            inv.add(InvType::MempoolTx, hash);
            match Payload::Inv(inv).to_frame() {
                Ok(frame) => {
                    self.event_bus.publish(Topic::Gossip, Payload::Gossip(frame));
                }
                Err(e) => warn!(tx = %hash, error = %e, "inv encode failed"),
            }
        }
    }

    /// Evict everything proven present in the accepted block.
    fn on_block(&self, block: &Block) {
        *self.latest_block_timestamp.write() = block.header.timestamp;

        let mut pool = self.pool.write();
        if pool.is_empty() {
            return;
        }

        let leaves: Vec<Hash> = block.txs.iter().map(|t| t.hash()).collect();
        let tree = MerkleTree::build(&leaves);
        let evicted = pool.evict_included(&tree);

        info!(
            height = block.height(),
            hash = %block.hash(),
            evicted,
            remaining = pool.len(),
            "pool rebuilt after accepted block"
        );
    }

    /// Stats logging and oversize alarms.
    fn on_idle(&self) {
        let pool = self.pool.read();
        let size_kb = pool.size_bytes() as f64 / 1000.0;
        debug!(txs = pool.len(), size_kb, "mempool stats");

        let max_bytes = self.config.max_size_mb * 1_000_000;
        if pool.size_bytes() > max_bytes {
            warn!(
                current = pool.size_bytes(),
                max_mb = self.config.max_size_mb,
                "mempool over size budget"
            );
        }
    }

    async fn handle_request(&self, request: RpcRequest) {
        match request.call.clone() {
            RpcCall::SendMempoolTx(tx) => {
                match self.process_tx(tx, KADCAST_INIT_HEIGHT).await {
                    Ok(hash) => request.respond(RpcReply::TxHash(hash)),
                    Err(e) => request.fail(e.to_string()),
                }
            }
            RpcCall::GetMempoolTxs { filter } => {
                let pool = self.pool.read();
                let txs = match filter {
                    Some(hash) => pool.get(&hash).map(|d| vec![d.tx.clone()]).unwrap_or_default(),
                    None => pool
                        .sorted_by_fee()
                        .into_iter()
                        .map(|d| d.tx.clone())
                        .collect(),
                };
                request.respond(RpcReply::Txs(txs));
            }
            RpcCall::GetMempoolTxsBySize { max_bytes } => {
                let txs = self.pool.read().sorted_up_to(max_bytes as usize);
                request.respond(RpcReply::Txs(txs));
            }
            RpcCall::GetMempoolView(types) => {
                let pool = self.pool.read();
                let mut txs = Vec::new();
                for call_type in types {
                    txs.extend(pool.filter_by_type(call_type));
                }
                request.respond(RpcReply::Txs(txs));
            }
            RpcCall::GetUnconfirmedBalance(view_key) => {
                let calls = self.pool.read().calls();
                match self.oracle.calculate_balance(&view_key, &calls).await {
                    Ok(balance) => request.respond(RpcReply::Balance(balance)),
                    Err(e) => request.fail(e.to_string()),
                }
            }
            other => request.fail(format!("mempool cannot serve {:?}", other.topic())),
        }
    }

    /// Spawn the owner task.
    ///
    /// Registers the mempool RPC topics and subscribes to accepted blocks;
    /// runs until cancelled.
    pub fn spawn(
        self: Arc<Self>,
        rpc_bus: Arc<RpcBus>,
        cancel: CancellationToken,
    ) -> umbra_bus::Result<JoinHandle<()>> {
        let mut send_rx = rpc_bus.register(Topic::SendMempoolTx)?;
        let mut get_rx = rpc_bus.register(Topic::GetMempoolTxs)?;
        let mut get_by_size_rx = rpc_bus.register(Topic::GetMempoolTxsBySize)?;
        let mut view_rx = rpc_bus.register(Topic::GetMempoolView)?;
        let mut balance_rx = rpc_bus.register(Topic::GetUnconfirmedBalance)?;
        let mut accepted_rx = self.event_bus.subscribe(Topic::AcceptedBlock);

        let handle = tokio::spawn(async move {
            let mut idle = tokio::time::interval(self.config.idle_interval);
            idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("mempool shutting down");
                        return;
                    }
                    Some(request) = send_rx.recv() => self.handle_request(request).await,
                    Some(request) = get_rx.recv() => self.handle_request(request).await,
                    Some(request) = get_by_size_rx.recv() => self.handle_request(request).await,
                    Some(request) = view_rx.recv() => self.handle_request(request).await,
                    Some(request) = balance_rx.recv() => self.handle_request(request).await,
                    accepted = accepted_rx.recv() => match accepted {
                        Ok(Payload::AcceptedBlock(block)) => self.on_block(&block),
                        Ok(other) => trace!(topic = %other.topic(), "ignoring non-block payload"),
                        Err(e) => warn!(error = %e, "accepted-block subscription lagged"),
                    },
                    _ = idle.tick() => self.on_idle(),
                }
            }
        });
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_oracle::harness::HarnessOracle;
    use umbra_types::transaction::{Distribute, Transfer};
    use umbra_types::{BlockHeader, PublicKeyBytes};

    fn tx(fee: u64, tag: u8) -> ContractCall {
        ContractCall::Transfer(Transfer {
            fee,
            nullifiers: vec![Hash::sha3(&[tag])],
            outputs: vec![],
            proof: vec![],
        })
    }

    fn mempool() -> (Arc<HarnessOracle>, Mempool) {
        let oracle = Arc::new(HarnessOracle::new());
        let bus = Arc::new(EventBus::new());
        let mempool = Mempool::new(
            oracle.clone() as Arc<dyn Oracle>,
            bus,
            MempoolConfig::default(),
        );
        (oracle, mempool)
    }

    #[tokio::test]
    async fn pipeline_accepts_and_pools() {
        let (_oracle, mempool) = mempool();
        let t = tx(100, 1);
        let hash = mempool.process_tx(t.clone(), 0).await.unwrap();
        assert_eq!(hash, t.hash());
        assert!(mempool.pool().read().contains(&hash));
    }

    #[tokio::test]
    async fn coinbase_is_rejected() {
        let (_oracle, mempool) = mempool();
        let coinbase = ContractCall::Distribute(Distribute {
            reward: 50,
            generator: PublicKeyBytes::ZERO,
        });
        assert!(matches!(
            mempool.process_tx(coinbase, 0).await,
            Err(MempoolError::CoinbaseNotAllowed)
        ));
    }

    #[tokio::test]
    async fn duplicate_is_rejected() {
        let (_oracle, mempool) = mempool();
        let t = tx(100, 1);
        mempool.process_tx(t.clone(), 0).await.unwrap();
        assert!(matches!(
            mempool.process_tx(t, 0).await,
            Err(MempoolError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn oracle_rejection_propagates() {
        let (oracle, mempool) = mempool();
        let t = tx(100, 1);
        oracle.poison(t.hash());
        assert!(matches!(
            mempool.process_tx(t, 0).await,
            Err(MempoolError::VerificationFailed(_))
        ));
    }

    #[tokio::test]
    async fn accepted_block_evicts_included() {
        let (_oracle, mempool) = mempool();
        let t1 = tx(100, 1);
        let t2 = tx(200, 2);
        mempool.process_tx(t1.clone(), 0).await.unwrap();
        mempool.process_tx(t2.clone(), 0).await.unwrap();

        let block = Block::new(BlockHeader::default(), vec![t1.clone()]);
        mempool.on_block(&block);

        let pool = mempool.pool();
        let pool = pool.read();
        assert!(!pool.contains(&t1.hash()));
        assert!(pool.contains(&t2.hash()));
    }

    #[tokio::test]
    async fn gossip_propagation_advertises_inv() {
        let oracle = Arc::new(HarnessOracle::new());
        let bus = Arc::new(EventBus::new());
        let mempool = Mempool::new(
            oracle as Arc<dyn Oracle>,
            Arc::clone(&bus),
            MempoolConfig::default(),
        );
        let mut gossip_rx = bus.subscribe(Topic::Gossip);

        let t = tx(100, 7);
        mempool.process_tx(t.clone(), 0).await.unwrap();

        let payload = gossip_rx.recv().await.unwrap();
        match payload {
            Payload::Gossip(frame) => {
                assert_eq!(frame.topic, Topic::Inv);
                let inv = InvMessage::from_bytes(&frame.payload).unwrap();
                assert_eq!(inv.hashes_of(InvType::MempoolTx), vec![t.hash()]);
            }
            other => panic!("expected gossip frame, got {:?}", other.topic()),
        }
    }
}
