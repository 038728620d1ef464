//! Block acceptance.
//!
//! The acceptor is the sole writer of the persisted chain and the sole
//! producer of round updates. Winning certificates from consensus and
//! certified blocks from the network funnel through [`Acceptor::accept`]:
//! sanity checks, certificate verification, atomic persistence, registry
//! advance, then the `AcceptedBlock` announcement.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use umbra_bus::{EventBus, RpcBus, RpcRequest};
use umbra_consensus::state::RoundUpdate;
use umbra_consensus::{Committee, Winner};
use umbra_crypto::bls::verify_aggregate_raw;
use umbra_oracle::Oracle;
use umbra_storage::{Database, StorageError};
use umbra_types::{Bid, BidList, Block, Certificate, Hash, Seed};
use umbra_wire::{Payload, RpcCall, RpcReply, Topic};

use crate::registry::RegistryWriter;
use crate::{ChainError, Result};

/// Verifies, persists and announces accepted blocks.
pub struct Acceptor {
    db: Arc<Database>,
    writer: RegistryWriter,
    oracle: Arc<dyn Oracle>,
    event_bus: Arc<EventBus>,
    round_tx: mpsc::Sender<RoundUpdate>,
}

impl Acceptor {
    /// Build the acceptor around the single registry write handle.
    pub fn new(
        db: Arc<Database>,
        writer: RegistryWriter,
        oracle: Arc<dyn Oracle>,
        event_bus: Arc<EventBus>,
        round_tx: mpsc::Sender<RoundUpdate>,
    ) -> Self {
        Self {
            db,
            writer,
            oracle,
            event_bus,
            round_tx,
        }
    }

    /// Emit the round update for the current tip, starting consensus.
    pub async fn kickstart(&self) {
        let registry = self.writer.registry();
        let tip = registry.tip_header();
        let update = RoundUpdate {
            round: tip.height + 1,
            provisioners: registry.provisioners(),
            bids: registry.bids(),
            seed: tip.seed,
            tip,
        };
        info!(round = update.round, "kickstarting consensus");
        let _ = self.round_tx.send(update).await;
    }

    /// Accept a block under its certificate.
    ///
    /// At most one block per height ever passes; the tip is strictly
    /// monotonic.
    pub async fn accept(&self, mut block: Block, certificate: Certificate) -> Result<()> {
        self.sanity_check(&block)?;
        self.check_certificate(&block, &certificate)?;

        block.header.certificate = certificate;
        match self.db.store_block(&block) {
            Err(StorageError::BlockExists) => return Err(ChainError::BlockExists),
            other => other?,
        }

        // State transition through the oracle yields the next provisioners.
        let response = self.oracle.execute_state_transition(&block).await?;

        let next_round = block.header.height + 1;
        let bids = self.updated_bids(&block, next_round);
        let provisioners = Arc::new(response.provisioners);
        self.writer
            .advance(block.clone(), Arc::clone(&provisioners), bids.clone());

        info!(
            height = block.header.height,
            hash = %block.hash(),
            txs = block.txs.len(),
            "block accepted"
        );

        let update = RoundUpdate {
            round: next_round,
            provisioners,
            bids,
            seed: block.header.seed,
            tip: block.header.clone(),
        };

        self.event_bus
            .publish(Topic::AcceptedBlock, Payload::AcceptedBlock(Box::new(block)));
        let _ = self.round_tx.send(update).await;
        Ok(())
    }

    /// Structural checks: not stored, header against tip, body roots,
    /// coinbase rules.
    fn sanity_check(&self, block: &Block) -> Result<()> {
        if self.db.block_exists(&block.hash())? {
            return Err(ChainError::BlockExists);
        }

        let tip = self.writer.registry().tip_header();
        block
            .header
            .validate_against(&tip)
            .map_err(|e| ChainError::InvalidHeader(e.to_string()))?;

        if !block.validate_tx_root() {
            return Err(ChainError::InvalidBody("tx root mismatch".into()));
        }

        let coinbases = block.txs.iter().filter(|t| t.is_coinbase()).count();
        if block.txs.is_empty() {
            // The canonical empty block carries no coinbase.
            return Ok(());
        }
        if coinbases != 1 || !block.txs[0].is_coinbase() {
            return Err(ChainError::InvalidBody(format!(
                "expected exactly one leading coinbase, found {}",
                coinbases
            )));
        }
        Ok(())
    }

    /// Verify both reduction phases of the certificate against the
    /// committees of the block's round.
    fn check_certificate(&self, block: &Block, certificate: &Certificate) -> Result<()> {
        let registry = self.writer.registry();
        let provisioners = registry.provisioners();
        // Sortition for round R ran on the seed of the block at R-1.
        let seed = registry.tip_header().seed;
        let round = block.header.height;
        let hash = block.hash();

        verify_phase(
            &seed,
            round,
            certificate.first_step,
            &provisioners,
            &certificate.first_keys,
            certificate.first_signature.as_bytes(),
            &hash,
            "first reduction",
        )?;
        verify_phase(
            &seed,
            round,
            certificate.step,
            &provisioners,
            &certificate.keys,
            certificate.signature.as_bytes(),
            &hash,
            "second reduction",
        )
    }

    /// Validate a candidate block on behalf of a voter.
    pub async fn verify_candidate(&self, block: &Block) -> Result<()> {
        self.sanity_check(block)?;

        let passed = self
            .oracle
            .validate_state_transition(&block.txs, block.header.height)
            .await?;
        if passed.len() != block.txs.len() {
            return Err(ChainError::InvalidBody(format!(
                "state transition rejected {} of {} calls",
                block.txs.len() - passed.len(),
                block.txs.len()
            )));
        }
        Ok(())
    }

    /// Fold the block's bid calls into the bid list and drop expired bids.
    fn updated_bids(&self, block: &Block, next_round: u64) -> BidList {
        let mut bids = self.writer.registry().bids();
        for tx in &block.txs {
            if let umbra_types::ContractCall::Bid(bid) = tx {
                bids.push(Bid {
                    x: Hash::sha3(&bid.encrypted_data),
                    m: bid.commitment,
                    end_height: bid.expiration,
                });
            }
        }
        bids.prune(next_round);
        bids
    }

    /// Spawn the acceptance loop.
    ///
    /// Consumes winners from the coordinator, certified blocks from the
    /// network, and serves candidate verification, candidate lookup and
    /// sync progress over the RPC bus.
    pub fn spawn(
        self: Arc<Self>,
        mut winner_rx: mpsc::Receiver<Winner>,
        rpc_bus: Arc<RpcBus>,
        cancel: CancellationToken,
    ) -> umbra_bus::Result<JoinHandle<()>> {
        let mut verify_rx = rpc_bus.register(Topic::VerifyStateTransition)?;
        let mut candidate_req_rx = rpc_bus.register(Topic::GetCandidate)?;
        let mut progress_rx = rpc_bus.register(Topic::GetSyncProgress)?;
        let mut block_sub = self.event_bus.subscribe(Topic::Block);
        let mut candidate_sub = self.event_bus.subscribe(Topic::Candidate);

        enum Ev {
            Quit,
            Winner(Winner),
            Request(RpcRequest),
            Block(Block),
            Candidate(Block),
            Skip,
        }

        let handle = tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    _ = cancel.cancelled() => Ev::Quit,
                    winner = winner_rx.recv() => winner.map(Ev::Winner).unwrap_or(Ev::Quit),
                    request = verify_rx.recv() => request.map(Ev::Request).unwrap_or(Ev::Quit),
                    request = candidate_req_rx.recv() => request.map(Ev::Request).unwrap_or(Ev::Quit),
                    request = progress_rx.recv() => request.map(Ev::Request).unwrap_or(Ev::Quit),
                    payload = block_sub.recv() => match payload {
                        Ok(Payload::Block(block)) => Ev::Block(*block),
                        Ok(_) => Ev::Skip,
                        Err(e) => {
                            warn!(error = %e, "block subscription lagged");
                            Ev::Skip
                        }
                    },
                    payload = candidate_sub.recv() => match payload {
                        Ok(Payload::Candidate(candidate)) => Ev::Candidate(candidate.block),
                        Ok(_) => Ev::Skip,
                        Err(e) => {
                            warn!(error = %e, "candidate subscription lagged");
                            Ev::Skip
                        }
                    },
                };

                match ev {
                    Ev::Quit => {
                        info!("acceptor shutting down");
                        return;
                    }
                    Ev::Skip => {}
                    Ev::Winner(winner) => self.on_winner(winner).await,
                    Ev::Block(block) => self.on_network_block(block).await,
                    Ev::Candidate(block) => self.writer.store_candidate(block),
                    Ev::Request(request) => self.on_request(request).await,
                }
            }
        });
        Ok(handle)
    }

    async fn on_winner(&self, winner: Winner) {
        let block = match winner.block.or_else(|| {
            self.writer.registry().candidate(&winner.hash)
        }) {
            Some(block) => block,
            None => {
                warn!(hash = %winner.hash, "winner without a known body, waiting for sync");
                return;
            }
        };

        match self.accept(block, winner.certificate).await {
            Ok(()) => {}
            Err(ChainError::BlockExists) => {
                trace!(hash = %winner.hash, "winner already accepted");
            }
            Err(e) => warn!(hash = %winner.hash, error = %e, "winner rejected"),
        }
    }

    /// A certified block arriving over the wire (chain sync).
    async fn on_network_block(&self, block: Block) {
        let height = block.header.height;
        self.writer.observe_remote_height(height);

        let tip_height = self.writer.registry().tip_height();
        if height <= tip_height {
            trace!(height, tip_height, "stale network block");
            return;
        }
        if height > tip_height + 1 {
            debug!(height, tip_height, "network block ahead of tip, sync gap");
            return;
        }

        let certificate = block.header.certificate.clone();
        if certificate.is_empty() && !block.txs.is_empty() {
            warn!(height, "network block without certificate");
            return;
        }

        match self.accept(block, certificate).await {
            Ok(()) => {}
            Err(ChainError::BlockExists) => {}
            Err(e) => warn!(height, error = %e, "network block rejected"),
        }
    }

    async fn on_request(&self, request: RpcRequest) {
        match request.call.clone() {
            RpcCall::VerifyCandidateBlock(block) => match self.verify_candidate(&block).await {
                Ok(()) => request.respond(RpcReply::Empty),
                Err(e) => request.fail(e.to_string()),
            },
            RpcCall::GetCandidate(hash) => {
                match self.writer.registry().candidate(&hash) {
                    Some(block) => request.respond(RpcReply::Candidate(Box::new(block))),
                    None => request.fail("candidate not found"),
                }
            }
            RpcCall::GetSyncProgress => {
                request.respond(RpcReply::SyncProgress(self.writer.registry().sync_progress()));
            }
            other => request.fail(format!("acceptor cannot serve {:?}", other.topic())),
        }
    }
}

/// Verify one reduction phase of a certificate.
#[allow(clippy::too_many_arguments)]
fn verify_phase(
    seed: &Seed,
    round: u64,
    step: u8,
    provisioners: &umbra_types::Provisioners,
    keys: &[umbra_types::PublicKeyBytes],
    signature: &[u8; 96],
    hash: &Hash,
    phase: &'static str,
) -> Result<()> {
    let committee = Committee::deterministic(seed, round, step, provisioners);
    let mut weight = 0usize;
    for key in keys {
        let votes = committee.votes_for(key);
        if votes == 0 {
            return Err(ChainError::InvalidCertificate(format!(
                "{}: signer outside committee",
                phase
            )));
        }
        weight += votes;
    }
    // Signer weight is slot-weighted, like the reduction quorum itself.
    if weight < committee.quorum() {
        return Err(ChainError::InvalidCertificate(format!(
            "{}: weight {} below quorum {}",
            phase,
            weight,
            committee.quorum()
        )));
    }

    let raw_keys: Vec<[u8; 48]> = keys.iter().map(|k| *k.as_bytes()).collect();
    if !verify_aggregate_raw(&raw_keys, hash.as_bytes(), signature) {
        return Err(ChainError::InvalidCertificate(format!(
            "{}: aggregate signature invalid",
            phase
        )));
    }
    Ok(())
}
