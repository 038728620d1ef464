//! # Umbra Wire
//!
//! The gossip wire protocol:
//! - [`frame`] - framing with length prefix, network magic, Blake2b checksum
//!   and topic byte
//! - [`topics`] - the stable-ordinal [`Topic`] enum
//! - [`messages`] - typed payloads for every wire and internal topic
//! - [`inv`] - inventory vectors for data advertisement
//! - [`dedup`] - fixed-TTL content-addressed suppression of repeats

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod dedup;
pub mod frame;
pub mod inv;
pub mod messages;
pub mod topics;

pub use dedup::{DedupFilter, Freshness};
pub use frame::{Frame, Magic, MAX_FRAME_SIZE};
pub use inv::{InvItem, InvMessage, InvType};
pub use messages::{
    AgreementMessage, AgreementPayload, BinaryMessage, CandidateMessage, ConsensusHeader, Payload,
    ReductionMessage, RpcCall, RpcReply, ScoreMessage, StepVotes, VersionMessage,
    PROTOCOL_VERSION, SERVICE_NODE,
};
pub use topics::Topic;

/// Result type alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors produced by the wire layer.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Frame magic does not match the configured network
    #[error("invalid magic: expected {expected:#010x}, got {got:#010x}")]
    InvalidMagic {
        /// The configured network magic
        expected: u32,
        /// The magic found in the frame
        got: u32,
    },

    /// Frame length exceeds the hard bound
    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    /// Frame checksum does not match the payload
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Buffer ended before the declared frame length
    #[error("short read")]
    ShortRead,

    /// Payload body failed to decode
    #[error("payload decode: {0}")]
    PayloadDecode(String),

    /// Payload body failed to encode
    #[error("payload encode: {0}")]
    PayloadEncode(String),

    /// Payload type does not match the frame topic
    #[error("payload does not belong to topic {0}")]
    TopicMismatch(Topic),

    /// Underlying socket failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
