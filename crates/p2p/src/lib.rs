//! # Umbra P2P
//!
//! The peer message plane:
//! - [`session`] - one session per TCP connection: handshake, framed
//!   read/write loops, keepalive, cooperative cancellation
//! - [`processor`] - routes decoded frames to per-topic handlers
//! - [`server`] - the listener and outbound connector
//!
//! Sessions are isolated: an I/O error terminates the session, never the
//! process.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod processor;
pub mod server;
pub mod session;

pub use processor::MessageProcessor;
pub use server::PeerServer;
pub use session::{Direction, Session, SessionConfig, SessionState};

/// Result type alias for p2p operations.
pub type Result<T> = std::result::Result<T, P2pError>;

/// Errors terminating a peer session.
#[derive(Debug, thiserror::Error)]
pub enum P2pError {
    /// Socket failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level failure (magic, checksum, size)
    #[error(transparent)]
    Wire(#[from] umbra_wire::WireError),

    /// The peer violated the handshake
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer went silent past the idle deadline
    #[error("peer idle timeout")]
    IdleTimeout,

    /// The session was cancelled by the caller
    #[error("session cancelled")]
    Cancelled,
}
