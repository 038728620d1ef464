//! # Umbra Oracle
//!
//! The consensus core delegates everything zero-knowledge and stateful to an
//! external orchestrator process: blind-bid score generation and
//! verification, transaction verification (including double-spend detection
//! against chain and pool), balance calculation and state transitions. This
//! crate specifies that surface as an async [`Oracle`] trait plus its
//! request/response types; the JSON-RPC (HTTP) client implementing it lives
//! with the node binary, and a deterministic in-process [`harness`] mock is
//! available behind the `harness` feature for tests.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

use async_trait::async_trait;
use std::time::Duration;

use umbra_types::{Block, ContractCall, Hash, Provisioners, Seed};

#[cfg(feature = "harness")]
pub mod harness;

/// Result type alias for oracle calls.
pub type Result<T> = std::result::Result<T, OracleError>;

/// Errors surfaced by oracle calls.
///
/// `Unavailable` and `Timeout` are transient: callers retry with backoff.
/// The rest are definitive answers about the submitted data.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The orchestrator is unreachable; retry with backoff
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its per-kind deadline; retry with backoff
    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    /// We are not in the bid list for this round
    #[error("not in the bid list")]
    NotABidder,

    /// Transaction failed verification (bad proof or double spend)
    #[error("transaction verification failed: {0}")]
    VerificationFailed(String),

    /// State transition rejected
    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Malformed request or response
    #[error("oracle protocol error: {0}")]
    Protocol(String),
}

impl OracleError {
    /// Whether a caller should retry the same call.
    pub fn is_transient(&self) -> bool {
        matches!(self, OracleError::Unavailable(_) | OracleError::Timeout(_))
    }
}

/// Per-kind call deadlines.
#[derive(Debug, Clone, Copy)]
pub struct OracleTimeouts {
    /// Deadline for transaction verification calls
    pub tx_timeout: Duration,
    /// Deadline for everything else
    pub default_timeout: Duration,
}

impl Default for OracleTimeouts {
    fn default() -> Self {
        Self {
            tx_timeout: Duration::from_secs(5),
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// Inputs to blind-bid score generation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenerateScoreRequest {
    /// The bid's secret `k`
    pub k: Hash,
    /// This round's seed
    pub seed: Seed,
    /// The bid's secret opening
    pub secret: Hash,
    /// Consensus round
    pub round: u64,
    /// Consensus step
    pub step: u8,
    /// Index of our bid in the stored bid list
    pub stored_bid_index: u64,
}

/// A generated score and its proof.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GenerateScoreResponse {
    /// The scalar score; higher wins
    pub score: Hash,
    /// The blind-bid proof
    pub proof: Vec<u8>,
    /// Identity hash bound into the proof
    pub identity: Hash,
}

/// Inputs to score verification.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VerifyScoreRequest {
    /// The proof under test
    pub proof: Vec<u8>,
    /// The claimed score
    pub score: Hash,
    /// The seed the proof was generated against
    pub seed: Seed,
    /// Identity hash bound into the proof
    pub identity: Hash,
    /// Consensus round
    pub round: u64,
    /// Consensus step
    pub step: u8,
}

/// Outcome of executing a state transition.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecuteResponse {
    /// The resulting state root
    pub state_root: Hash,
    /// The provisioner set after the transition
    pub provisioners: Provisioners,
}

/// The orchestrator request/response surface.
///
/// All calls suspend; implementations enforce [`OracleTimeouts`].
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Liveness probe.
    async fn echo(&self) -> Result<()>;

    /// Produce a blind-bid score for this round and step.
    ///
    /// Fails with [`OracleError::NotABidder`] when the caller has no active
    /// bid, which the score generator treats as "stay silent this round".
    async fn generate_score(&self, req: GenerateScoreRequest) -> Result<GenerateScoreResponse>;

    /// Verify a score proof from another generator.
    async fn verify_score(&self, req: VerifyScoreRequest) -> Result<bool>;

    /// Derive a secret key from seed material.
    async fn generate_secret_key(&self, seed: &[u8]) -> Result<Vec<u8>>;

    /// Verify a transaction against chain state and the unconfirmed pool.
    async fn verify_transaction(&self, call: &ContractCall) -> Result<bool>;

    /// Unconfirmed balance of a view key over a set of pool transactions.
    async fn calculate_balance(&self, view_key: &[u8], calls: &[ContractCall]) -> Result<u64>;

    /// Validate a candidate block's calls; returns the indices that passed.
    async fn validate_state_transition(&self, calls: &[ContractCall], height: u64)
        -> Result<Vec<usize>>;

    /// Execute an accepted block's calls against state.
    async fn execute_state_transition(&self, block: &Block) -> Result<ExecuteResponse>;
}
