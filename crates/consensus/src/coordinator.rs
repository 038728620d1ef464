//! The per-round phase driver.
//!
//! `Generation -> Reduction1 -> Reduction2 -> Agreement`, with the binary
//! tie-break when reduction cannot converge. The coordinator owns the
//! shared round/step clock, re-creates the per-round components from each
//! round update, and tears a round down the moment a newer round update
//! arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use umbra_bus::{EventBus, RpcBus};
use umbra_crypto::NodeKeys;
use umbra_oracle::{Oracle, VerifyScoreRequest};
use umbra_types::{Block, Certificate, Hash};
use umbra_wire::{
    AgreementMessage, AgreementPayload, BinaryMessage, CandidateMessage, Payload,
    ReductionMessage, ScoreMessage, Topic,
};

use crate::agreement::{AgreementAccumulator, WinningCertificate};
use crate::candidate::CandidateGenerator;
use crate::coin::{BinaryAgreement, BinaryOutcome};
use crate::queue::EventFilter;
use crate::reduction::Reducer;
use crate::score::{BidSecrets, ScoreGenerator};
use crate::state::{RoundUpdate, State};
use crate::MAX_STEPS;

/// The coordinator's phase within a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for scores and candidates
    Generating,
    /// First reduction phase
    Reducing1,
    /// Second reduction phase
    Reducing2,
    /// Accumulating agreements
    Agreeing,
    /// The round produced a certificate for this hash
    Done(Hash),
    /// The round failed; it restarts on the next round update
    Failed,
}

/// A decided round, handed to the acceptor.
#[derive(Debug, Clone)]
pub struct Winner {
    /// The decided round
    pub round: u64,
    /// The winning block hash
    pub hash: Hash,
    /// The certificate proving the decision
    pub certificate: Certificate,
    /// The winning block, when we hold it
    pub block: Option<Block>,
}

/// Coordinator timing knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Base reduction timeout; doubled each failed round, reset on accept
    pub lambda: Duration,
    /// How long the selector waits for scores before reduction starts
    pub generation_window: Duration,
    /// Byte budget for candidate blocks
    pub max_block_bytes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lambda: Duration::from_secs(5),
            generation_window: Duration::from_secs(3),
            max_block_bytes: 200_000,
        }
    }
}

enum RoundOutcome {
    Winner(Box<Winner>),
    Failed,
}

/// Drives the consensus phase sequence.
pub struct Coordinator {
    oracle: Arc<dyn Oracle>,
    event_bus: Arc<EventBus>,
    config: CoordinatorConfig,

    state: State,
    lambda: Duration,
    phase: Phase,

    score_filter: Arc<EventFilter<ScoreMessage>>,
    score_rx: mpsc::UnboundedReceiver<ScoreMessage>,
    reduction_filter: Arc<EventFilter<ReductionMessage>>,
    reduction_rx: mpsc::UnboundedReceiver<ReductionMessage>,
    agreement_filter: Arc<EventFilter<AgreementMessage>>,
    agreement_rx: mpsc::UnboundedReceiver<AgreementMessage>,
    binary_filter: Arc<EventFilter<BinaryMessage>>,
    binary_rx: mpsc::UnboundedReceiver<BinaryMessage>,
    candidate_rx: mpsc::UnboundedReceiver<CandidateMessage>,
    candidate_tx: mpsc::UnboundedSender<CandidateMessage>,

    candidates: HashMap<Hash, Block>,
    // Persists across regeneration passes within one round.
    accumulator: Option<AgreementAccumulator>,
    score_gen: ScoreGenerator,
    candidate_gen: CandidateGenerator,
    reducer: Reducer,
    binary: BinaryAgreement,
}

impl Coordinator {
    /// Assemble a coordinator over the buses.
    pub fn new(
        keys: NodeKeys,
        oracle: Arc<dyn Oracle>,
        event_bus: Arc<EventBus>,
        rpc_bus: Arc<RpcBus>,
        bid_secrets: Option<BidSecrets>,
        config: CoordinatorConfig,
    ) -> Self {
        let state = State::new(1);

        let (score_tx, score_rx) = mpsc::unbounded_channel();
        let (reduction_tx, reduction_rx) = mpsc::unbounded_channel();
        let (agreement_tx, agreement_rx) = mpsc::unbounded_channel();
        let (binary_tx, binary_rx) = mpsc::unbounded_channel();
        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();

        let score_filter = Arc::new(EventFilter::new(state.clone(), true, score_tx));
        let reduction_filter = Arc::new(EventFilter::new(state.clone(), true, reduction_tx));
        // Agreement aggregates across steps: round check only.
        let agreement_filter = Arc::new(EventFilter::new(state.clone(), false, agreement_tx));
        let binary_filter = Arc::new(EventFilter::new(state.clone(), false, binary_tx));

        let lambda = config.lambda;
        Self {
            score_gen: ScoreGenerator::new(keys.clone(), Arc::clone(&oracle), bid_secrets),
            candidate_gen: CandidateGenerator::new(
                keys.clone(),
                rpc_bus,
                Arc::clone(&event_bus),
                config.max_block_bytes,
            ),
            reducer: Reducer::new(keys.clone(), Arc::clone(&event_bus)),
            binary: BinaryAgreement::new(keys, Arc::clone(&event_bus)),
            oracle,
            event_bus,
            config,
            state,
            lambda,
            phase: Phase::Generating,
            score_filter,
            score_rx,
            reduction_filter,
            reduction_rx,
            agreement_filter,
            agreement_rx,
            binary_filter,
            binary_rx,
            candidate_rx,
            candidate_tx,
            candidates: HashMap::new(),
            accumulator: None,
        }
    }

    /// The shared round/step clock.
    pub fn state(&self) -> State {
        self.state.clone()
    }

    /// The phase the coordinator is currently in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Spawn the intake task routing bus subscriptions into the filters.
    fn spawn_intake(&self, cancel: CancellationToken) {
        let mut score_sub = self.event_bus.subscribe(Topic::Score);
        let mut reduction_sub = self.event_bus.subscribe(Topic::Reduction);
        let mut agreement_sub = self.event_bus.subscribe(Topic::Agreement);
        let mut candidate_sub = self.event_bus.subscribe(Topic::Candidate);

        let score_filter = Arc::clone(&self.score_filter);
        let reduction_filter = Arc::clone(&self.reduction_filter);
        let agreement_filter = Arc::clone(&self.agreement_filter);
        let binary_filter = Arc::clone(&self.binary_filter);
        let candidate_tx = self.candidate_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    msg = score_sub.recv() => {
                        if let Ok(Payload::Score(msg)) = msg {
                            score_filter.collect(*msg);
                        }
                    }
                    msg = reduction_sub.recv() => {
                        if let Ok(Payload::Reduction(msg)) = msg {
                            reduction_filter.collect(*msg);
                        }
                    }
                    msg = agreement_sub.recv() => {
                        if let Ok(Payload::Agreement(msg)) = msg {
                            match *msg {
                                AgreementPayload::Set(inner) => agreement_filter.collect(inner),
                                AgreementPayload::Binary(inner) => binary_filter.collect(inner),
                            }
                        }
                    }
                    msg = candidate_sub.recv() => {
                        if let Ok(Payload::Candidate(msg)) = msg {
                            let _ = candidate_tx.send(*msg);
                        }
                    }
                }
            }
        });
    }

    /// Run until cancelled, consuming round updates and producing winners.
    pub async fn run(
        mut self,
        mut round_rx: mpsc::Receiver<RoundUpdate>,
        winner_tx: mpsc::Sender<Winner>,
        cancel: CancellationToken,
    ) {
        self.spawn_intake(cancel.clone());

        enum Next {
            Quit,
            Abandon(RoundUpdate),
            Outcome(RoundOutcome),
        }

        let mut pending: Option<RoundUpdate> = None;
        'rounds: loop {
            let update = match pending.take() {
                Some(update) => update,
                None => tokio::select! {
                    _ = cancel.cancelled() => return,
                    update = round_rx.recv() => match update {
                        Some(update) => update,
                        None => return,
                    },
                },
            };

            self.begin_round(&update);

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => Next::Quit,
                    next = round_rx.recv() => match next {
                        Some(next) => Next::Abandon(next),
                        None => Next::Quit,
                    },
                    outcome = self.round_sequence(&update, &cancel) => Next::Outcome(outcome),
                };

                match next {
                    Next::Quit => return,
                    Next::Abandon(next) => {
                        // A newer round update cancels everything in flight.
                        info!(
                            round = update.round,
                            next_round = next.round,
                            "higher round observed, abandoning round"
                        );
                        self.phase = Phase::Failed;
                        pending = Some(next);
                        continue 'rounds;
                    }
                    Next::Outcome(RoundOutcome::Winner(winner)) => {
                        self.phase = Phase::Done(winner.hash);
                        // Timer leniency resets once a round succeeds.
                        self.lambda = self.config.lambda;
                        if winner_tx.send(*winner).await.is_err() {
                            return;
                        }
                        continue 'rounds;
                    }
                    Next::Outcome(RoundOutcome::Failed) => {
                        self.phase = Phase::Failed;
                        self.lambda = self.lambda.saturating_mul(2);
                        warn!(
                            round = update.round,
                            lambda_ms = self.lambda.as_millis() as u64,
                            "round failed, doubling timer leniency and regenerating"
                        );
                    }
                }
            }
        }
    }

    /// Reset per-round state for a fresh round update.
    fn begin_round(&mut self, update: &RoundUpdate) {
        info!(round = update.round, "starting round");
        self.state.update_round(update.round);
        self.phase = Phase::Generating;
        self.candidates.clear();
        self.accumulator = None;
        self.score_gen.init_round(update);

        // Old rounds are garbage, the new round's early events are live.
        self.score_filter.clear_stale();
        self.reduction_filter.clear_stale();
        self.agreement_filter.clear_stale();
        self.binary_filter.clear_stale();
        self.score_filter.flush();
        self.agreement_filter.flush();
        self.binary_filter.flush();
    }

    /// One pass through the phase sequence, looping through the tie-break
    /// until the round is decided or fails.
    async fn round_sequence(
        &mut self,
        update: &RoundUpdate,
        cancel: &CancellationToken,
    ) -> RoundOutcome {
        // The accumulator is per-round and survives regeneration passes.
        let mut accumulator = self
            .accumulator
            .take()
            .unwrap_or_else(|| AgreementAccumulator::new(update.clone()));
        // Set by the tie-break: skip generation and vote this hash.
        let mut forced: Option<Hash> = None;

        loop {
            if self.state.step() >= MAX_STEPS {
                self.accumulator = Some(accumulator);
                return RoundOutcome::Failed;
            }

            let held = match forced.take() {
                Some(hash) => hash,
                None => {
                    self.phase = Phase::Generating;
                    self.generation(update).await
                }
            };

            // First reduction.
            self.state.increment_step();
            self.phase = Phase::Reducing1;
            self.reduction_filter.flush();
            let step1 = self.state.step();
            let first = self
                .reducer
                .run_phase(update, step1, held, self.lambda, &mut self.reduction_rx, cancel)
                .await;

            // Second reduction votes on the first phase's outcome.
            self.state.increment_step();
            self.phase = Phase::Reducing2;
            self.reduction_filter.flush();
            let step2 = self.state.step();
            let second = self
                .reducer
                .run_phase(
                    update,
                    step2,
                    first.hash,
                    self.lambda,
                    &mut self.reduction_rx,
                    cancel,
                )
                .await;

            if let Some(agreement) = self.reducer.agreement_from(update, &first, &second) {
                match Payload::Agreement(Box::new(AgreementPayload::Set(agreement.clone())))
                    .to_frame()
                {
                    Ok(frame) => {
                        self.event_bus.publish(Topic::Gossip, Payload::Gossip(frame));
                    }
                    Err(e) => warn!(error = %e, "agreement encode failed"),
                }
                if let Some(winner) = accumulator.process(agreement) {
                    return RoundOutcome::Winner(Box::new(self.winner_from(winner)));
                }
            }

            // Agreement: wait for quorum of agreements from the network.
            self.phase = Phase::Agreeing;
            self.agreement_filter.flush();
            if let Some(winner) = self.collect_agreements(update, &mut accumulator, cancel).await {
                return RoundOutcome::Winner(Box::new(self.winner_from(winner)));
            }

            if !second.is_nil() {
                // Reduction converged but no agreement quorum arrived in the
                // window; regenerate with more leniency.
                self.accumulator = Some(accumulator);
                return RoundOutcome::Failed;
            }

            // Reduction never converged: binary tie-break between the
            // candidate and the empty block.
            let empty_block = Block::empty(&update.tip);
            let empty_hash = empty_block.hash();
            self.candidates.entry(empty_hash).or_insert(empty_block);

            self.state.increment_step();
            self.binary_filter.flush();
            let (outcome, final_step) = self
                .binary
                .run(
                    update,
                    self.state.step(),
                    held,
                    empty_hash,
                    Hash::sha3(update.seed.as_bytes()),
                    self.lambda,
                    &mut self.binary_rx,
                    cancel,
                )
                .await;
            self.state.set_step(final_step);

            match outcome {
                BinaryOutcome::Decided { hash, .. } => {
                    debug!(
                        round = update.round,
                        hash = %hash,
                        "tie-break decided, re-running reduction"
                    );
                    forced = Some(hash);
                }
                BinaryOutcome::Failed => {
                    self.accumulator = Some(accumulator);
                    return RoundOutcome::Failed;
                }
            }
        }
    }

    /// The generation/selection window: emit our score, collect everyone's,
    /// hold the best score's candidate hash.
    async fn generation(&mut self, update: &RoundUpdate) -> Hash {
        let step = self.state.step();
        self.score_filter.flush();

        let mut best: Option<ScoreMessage> = None;

        // Our own attempt first.
        if let Some(own_score) = self.score_gen.generate(update, step).await {
            match self.candidate_gen.generate(update, own_score).await {
                Ok((score, block)) => {
                    self.candidates.insert(block.hash(), block);
                    best = Some(score);
                }
                Err(e) => warn!(round = update.round, error = %e, "candidate assembly failed"),
            }
        }

        enum Ev {
            Window,
            Score(ScoreMessage),
            Candidate(CandidateMessage),
        }

        let deadline = tokio::time::sleep(self.config.generation_window);
        tokio::pin!(deadline);

        loop {
            let ev = tokio::select! {
                _ = &mut deadline => Ev::Window,
                msg = self.score_rx.recv() => msg.map(Ev::Score).unwrap_or(Ev::Window),
                msg = self.candidate_rx.recv() => msg.map(Ev::Candidate).unwrap_or(Ev::Window),
            };

            match ev {
                Ev::Window => break,
                Ev::Candidate(candidate) => self.store_candidate(update, candidate),
                Ev::Score(msg) => {
                    if self.verify_remote_score(update, &msg).await {
                        let better = best.as_ref().map(|b| msg.score > b.score).unwrap_or(true);
                        if better {
                            trace!(score = %msg.score, "better score observed");
                            best = Some(msg);
                        }
                    }
                }
            }
        }

        match best {
            Some(score) => score.header.block_hash,
            None => Hash::NIL,
        }
    }

    async fn verify_remote_score(&self, update: &RoundUpdate, msg: &ScoreMessage) -> bool {
        if msg.header.round != update.round || msg.prev_hash != update.last_hash() {
            return false;
        }
        let request = VerifyScoreRequest {
            proof: msg.proof.clone(),
            score: msg.score,
            seed: msg.seed,
            identity: Hash::sha3(msg.header.sender.as_bytes()),
            round: msg.header.round,
            step: msg.header.step,
        };
        match self.oracle.verify_score(request).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "score verification unavailable");
                false
            }
        }
    }

    /// Keep a candidate block if it extends our tip.
    fn store_candidate(&mut self, update: &RoundUpdate, candidate: CandidateMessage) {
        let block = candidate.block;
        if block.header.prev_hash != update.last_hash() {
            trace!(hash = %block.hash(), "candidate for another tip dropped");
            return;
        }
        if !block.validate_tx_root() {
            warn!(hash = %block.hash(), "candidate with bad tx root dropped");
            return;
        }
        self.candidates.insert(block.hash(), block);
    }

    /// Wait for agreements until a certificate emerges or the window ends.
    async fn collect_agreements(
        &mut self,
        update: &RoundUpdate,
        accumulator: &mut AgreementAccumulator,
        cancel: &CancellationToken,
    ) -> Option<WinningCertificate> {
        enum Ev {
            Stop,
            Agreement(AgreementMessage),
            Candidate(CandidateMessage),
        }

        let deadline = tokio::time::sleep(self.lambda.saturating_mul(2));
        tokio::pin!(deadline);

        loop {
            let ev = tokio::select! {
                _ = cancel.cancelled() => Ev::Stop,
                _ = &mut deadline => Ev::Stop,
                msg = self.agreement_rx.recv() => msg.map(Ev::Agreement).unwrap_or(Ev::Stop),
                msg = self.candidate_rx.recv() => msg.map(Ev::Candidate).unwrap_or(Ev::Stop),
            };

            match ev {
                Ev::Stop => return None,
                // Late candidates still matter: the winning body may arrive
                // while we are already agreeing.
                Ev::Candidate(candidate) => self.store_candidate(update, candidate),
                Ev::Agreement(msg) => {
                    if let Some(winner) = accumulator.process(msg) {
                        return Some(winner);
                    }
                }
            }
        }
    }

    fn winner_from(&mut self, winning: WinningCertificate) -> Winner {
        let block = self.candidates.get(&winning.hash).cloned();
        if block.is_none() {
            // Ask the network for the candidate body; it will arrive as a
            // Candidate frame before or after the acceptor needs it.
            if let Ok(frame) = Payload::GetCandidate(winning.hash).to_frame() {
                self.event_bus.publish(Topic::Gossip, Payload::Gossip(frame));
            }
            warn!(hash = %winning.hash, "winning certificate without candidate body");
        }
        Winner {
            round: winning.round,
            hash: winning.hash,
            certificate: winning.certificate,
            block,
        }
    }
}
