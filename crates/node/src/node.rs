//! Full node assembly.
//!
//! [`Node::start`] opens storage, loads keys, wires the buses and spawns
//! every owner task: mempool, acceptor, coordinator, peer listener. Each
//! failure in here is init-time and therefore fatal; after start, component
//! errors stay inside their tasks.

use anyhow::{anyhow, Context};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use umbra_bus::{EventBus, RpcBus};
use umbra_chain::{genesis_block, Acceptor, GenesisKind, Registry};
use umbra_consensus::coordinator::CoordinatorConfig;
use umbra_consensus::score::BidSecrets;
use umbra_consensus::Coordinator;
use umbra_config::Config;
use umbra_crypto::NodeKeys;
use umbra_mempool::{Mempool, MempoolConfig};
use umbra_oracle::{Oracle, OracleTimeouts};
use umbra_p2p::{MessageProcessor, PeerServer, Session, SessionConfig};
use umbra_storage::{Database, DatabaseConfig};
use umbra_types::BidList;
use umbra_wire::Magic;

use crate::oracle_client::{own_bid_key, RpcOracle};

/// A running node and the handles needed to stop it.
pub struct NodeHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Wait until the node is asked to stop (ctrl-c) and shut down.
    pub async fn wait(mut self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
            }
            _ = self.cancel.cancelled() => {}
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("node stopped");
    }

    /// Trigger a shutdown programmatically.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// The assembled full node.
pub struct Node;

impl Node {
    /// Start every component; errors here are fatal to the process.
    pub async fn start(config: Config, genesis: GenesisKind) -> anyhow::Result<NodeHandle> {
        let magic = parse_magic(&config.network.magic)?;
        let data_dir = PathBuf::from(&config.storage.data_dir);
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        // Storage first; an unopenable database is a fatal init error.
        let db = Arc::new(
            Database::open(&data_dir.join("chain"), DatabaseConfig::default())
                .context("opening chain database")?,
        );

        // Boot the chain from genesis when the store is empty.
        let tip = match db.tip().context("reading chain tip")? {
            Some(tip) => tip,
            None => {
                let genesis = genesis_block(genesis);
                db.store_block(&genesis).context("storing genesis")?;
                info!(hash = %genesis.hash(), "chain bootstrapped from genesis");
                genesis
            }
        };

        let keys = load_or_generate_keys(&data_dir.join("node.key"))?;
        info!(bls_key = %keys.bls_public.to_hex(), "node identity loaded");

        let oracle: Arc<dyn Oracle> = Arc::new(
            RpcOracle::connect(
                &config.oracle.address,
                OracleTimeouts {
                    tx_timeout: Duration::from_secs(config.oracle.tx_timeout_secs),
                    default_timeout: Duration::from_secs(config.oracle.default_timeout_secs),
                },
            )
            .context("connecting to the oracle")?,
        );

        // The current provisioner set is whatever the oracle derives from
        // the tip.
        let provisioners = match oracle.execute_state_transition(&tip).await {
            Ok(response) => response.provisioners,
            Err(e) => {
                warn!(error = %e, "oracle unavailable at boot, starting with an empty stake table");
                Default::default()
            }
        };

        let event_bus = Arc::new(EventBus::new());
        let rpc_bus = Arc::new(RpcBus::new());
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        // Registry and its single write capability.
        let (registry, writer) = Registry::create(tip, provisioners, BidList::new());

        // Mempool owner task.
        let mempool = Arc::new(Mempool::new(
            Arc::clone(&oracle),
            Arc::clone(&event_bus),
            MempoolConfig {
                max_size_mb: config.mempool.max_size_mb,
                kadcast_enabled: config.network.kadcast_enabled,
                ..Default::default()
            },
        ));
        tasks.push(
            Arc::clone(&mempool)
                .spawn(Arc::clone(&rpc_bus), cancel.clone())
                .map_err(|e| anyhow!("mempool registration: {}", e))?,
        );

        // Acceptor: consumes winners, produces round updates.
        let (round_tx, round_rx) = mpsc::channel(16);
        let (winner_tx, winner_rx) = mpsc::channel(16);
        let acceptor = Arc::new(Acceptor::new(
            Arc::clone(&db),
            writer,
            Arc::clone(&oracle),
            Arc::clone(&event_bus),
            round_tx,
        ));
        tasks.push(
            Arc::clone(&acceptor)
                .spawn(winner_rx, Arc::clone(&rpc_bus), cancel.clone())
                .map_err(|e| anyhow!("acceptor registration: {}", e))?,
        );

        // Consensus coordinator.
        let bid_secrets = load_bid_secrets(&db, &keys);
        let coordinator = Coordinator::new(
            keys,
            Arc::clone(&oracle),
            Arc::clone(&event_bus),
            Arc::clone(&rpc_bus),
            bid_secrets,
            CoordinatorConfig {
                lambda: Duration::from_millis(config.consensus.lambda_ms),
                generation_window: Duration::from_millis(config.consensus.generation_window_ms),
                max_block_bytes: config.consensus.max_block_bytes,
            },
        );
        {
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.run(round_rx, winner_tx, cancel).await;
            }));
        }

        // Peer plane.
        let processor = Arc::new(MessageProcessor::new(
            Arc::clone(&event_bus),
            Arc::clone(&rpc_bus),
            Arc::clone(&db),
        ));
        let idle_timeout = Duration::from_secs(config.network.idle_timeout_secs);
        let server = PeerServer::new(Session::new(
            processor,
            Arc::clone(&event_bus),
            SessionConfig {
                magic,
                idle_timeout,
                keep_alive: Duration::from_secs(config.network.keep_alive_secs),
            },
        ));
        let listen_addr = config
            .network
            .listen_address
            .parse()
            .context("parsing listen address")?;
        tasks.push(
            server
                .listen(listen_addr, cancel.clone())
                .await
                .context("binding the peer listener")?,
        );
        for peer in &config.network.bootstrap_peers {
            match peer.parse() {
                Ok(addr) => {
                    tasks.push(server.connect(addr, cancel.clone()));
                }
                Err(e) => warn!(peer = %peer, error = %e, "skipping unparsable bootstrap peer"),
            }
        }

        let _ = registry; // Read handle lives in the acceptor's writer.

        // Everything is wired: announce the first round.
        acceptor.kickstart().await;

        Ok(NodeHandle { cancel, tasks })
    }
}

fn parse_magic(name: &str) -> anyhow::Result<Magic> {
    match name {
        "mainnet" => Ok(Magic::MainNet),
        "testnet" => Ok(Magic::TestNet),
        "devnet" => Ok(Magic::DevNet),
        other => Err(anyhow!("unknown network magic '{}'", other)),
    }
}

/// Load the node key seed, generating and persisting one on first start.
fn load_or_generate_keys(path: &Path) -> anyhow::Result<NodeKeys> {
    let seed: [u8; 32] = if path.exists() {
        let encoded = std::fs::read_to_string(path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        let bytes = hex::decode(encoded.trim()).context("decoding key file")?;
        bytes
            .try_into()
            .map_err(|_| anyhow!("key file is not a 32-byte seed"))?
    } else {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        std::fs::write(path, hex::encode(seed))
            .with_context(|| format!("writing key file {}", path.display()))?;
        info!(path = %path.display(), "generated a fresh node key");
        seed
    };
    NodeKeys::from_seed(&seed).map_err(|e| anyhow!("deriving node keys: {}", e))
}

/// Our bid's secrets, if a bid was stored for this identity.
fn load_bid_secrets(db: &Database, keys: &NodeKeys) -> Option<BidSecrets> {
    let commitment = own_bid_key(&keys.bls_public.to_bytes());
    match db.fetch_bid(&commitment) {
        Ok(Some(stored)) => Some(BidSecrets {
            k: stored.k,
            secret: stored.d,
            commitment,
        }),
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "bid store unreadable, generating without a bid");
            None
        }
    }
}
