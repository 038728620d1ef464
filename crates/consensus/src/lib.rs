//! # Umbra Consensus
//!
//! The multi-phase consensus core. Each round a committee drawn by
//! [`sortition`] runs score generation ([`score`]), candidate generation
//! ([`candidate`]), two [`reduction`] phases and [`agreement`], yielding a
//! canonical block hash and its aggregated certificate. The [`coordinator`]
//! drives the phase sequence and tears everything down on round advance.
//!
//! Consensus components are created fresh per round from a
//! [`RoundUpdate`](state::RoundUpdate) snapshot and emit messages only for
//! that round.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod agreement;
pub mod candidate;
pub mod coin;
pub mod coordinator;
pub mod queue;
pub mod reduction;
pub mod score;
pub mod sortition;
pub mod state;

pub use coordinator::{Coordinator, Phase, Winner};
pub use sortition::{quorum, Committee, COMMITTEE_SIZE};
pub use state::{RoundUpdate, State, Threshold};

/// Hard cap on steps within a round; reaching it without a winner fails
/// the round.
pub const MAX_STEPS: u8 = 213;

/// Result type alias for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors surfaced by consensus components.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// A message failed signature or membership verification
    #[error("invalid consensus message: {0}")]
    InvalidMessage(String),

    /// The round exceeded the step cap without a winner
    #[error("round {0} exceeded the step cap")]
    MaxStepsExceeded(u64),

    /// Oracle failure
    #[error(transparent)]
    Oracle(#[from] umbra_oracle::OracleError),

    /// Crypto failure
    #[error(transparent)]
    Crypto(#[from] umbra_crypto::CryptoError),

    /// Bus failure
    #[error(transparent)]
    Bus(#[from] umbra_bus::BusError),

    /// A required channel closed underneath a component
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}
