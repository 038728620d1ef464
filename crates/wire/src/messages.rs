//! Typed payloads for wire and bus topics.
//!
//! Consensus messages share a uniform [`ConsensusHeader`]; the event filter
//! routes on it without knowing the concrete message kind. Envelope bytes
//! functions define exactly what the Ed25519 envelope signature covers, so
//! signer and verifier cannot drift apart.

use serde::{Deserialize, Serialize};

use umbra_types::{
    Block, BlsSignatureBytes, ContractCall, EdSignatureBytes, Hash, PublicKeyBytes, Seed,
};

use crate::frame::Frame;
use crate::inv::InvMessage;
use crate::topics::Topic;
use crate::{Result, WireError};

/// Uniform header across Score, Reduction and Agreement events.
///
/// Two events compare on `(round, step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusHeader {
    /// Consensus round (equals the height being decided)
    pub round: u64,
    /// Step within the round
    pub step: u8,
    /// The block hash the event refers to ([`Hash::NIL`] for "nil")
    pub block_hash: Hash,
    /// BLS key of the sender
    pub sender: PublicKeyBytes,
}

impl ConsensusHeader {
    /// The `(round, step)` ordering key.
    pub fn position(&self) -> (u64, u8) {
        (self.round, self.step)
    }
}

/// A blind-bid score proposal, produced by the score generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreMessage {
    /// Uniform event header; `block_hash` is the candidate hash once known
    pub header: ConsensusHeader,
    /// The scalar score produced by the blind-bid circuit
    pub score: Hash,
    /// Opaque blind-bid proof, verified by the oracle
    pub proof: Vec<u8>,
    /// The round seed the score was generated against
    pub seed: Seed,
    /// Chain tip the proposal extends
    pub prev_hash: Hash,
}

/// A committee member's vote in a reduction phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionMessage {
    /// Uniform event header; `sender` is the voter's BLS key
    pub header: ConsensusHeader,
    /// Chain tip the voter is on; votes for another tip are discarded
    pub prev_hash: Hash,
    /// BLS signature over the voted block hash
    pub signature: BlsSignatureBytes,
    /// Ed25519 envelope key
    pub ed_key: [u8; 32],
    /// Ed25519 envelope signature
    pub ed_signature: EdSignatureBytes,
}

impl ReductionMessage {
    /// Bytes covered by the Ed25519 envelope signature.
    pub fn envelope_bytes(&self) -> Vec<u8> {
        envelope_bytes(&self.header, &self.prev_hash, self.signature.as_bytes())
    }
}

/// Aggregated votes for one reduction step, embedded in agreements and
/// certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepVotes {
    /// The reduction step these votes were cast at
    pub step: u8,
    /// Aggregated BLS signature of all voters over the block hash
    pub signature: BlsSignatureBytes,
    /// The voters' BLS keys
    pub voters: Vec<PublicKeyBytes>,
}

/// The result of a successful double reduction, broadcast for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementMessage {
    /// Uniform event header; `sender` is the agreeing provisioner
    pub header: ConsensusHeader,
    /// Chain tip the agreement extends
    pub prev_hash: Hash,
    /// Per-step vote contributions (first and second reduction)
    pub votes: Vec<StepVotes>,
    /// Ed25519 envelope key
    pub ed_key: [u8; 32],
    /// Ed25519 envelope signature
    pub ed_signature: EdSignatureBytes,
}

impl AgreementMessage {
    /// Bytes covered by the Ed25519 envelope signature.
    ///
    /// Covers the header, the tip and the embedded vote sets, so a relay
    /// cannot splice vote sets between agreements.
    pub fn envelope_bytes(&self) -> Vec<u8> {
        let votes = bincode::serialize(&self.votes).unwrap_or_default();
        let mut out = envelope_bytes(&self.header, &self.prev_hash, &[]);
        out.extend_from_slice(&votes);
        out
    }
}

/// A vote in the binary agreement tie-break loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMessage {
    /// Uniform event header
    pub header: ConsensusHeader,
    /// Whether the voter favors the empty block
    pub empty: bool,
    /// Chain tip the voter is on
    pub prev_hash: Hash,
    /// The voter's sortition score, fed to the common coin
    pub score: Hash,
    /// BLS signature over the voted block hash
    pub signature: BlsSignatureBytes,
    /// Ed25519 envelope key
    pub ed_key: [u8; 32],
    /// Ed25519 envelope signature
    pub ed_signature: EdSignatureBytes,
}

impl BinaryMessage {
    /// Bytes covered by the Ed25519 envelope signature.
    pub fn envelope_bytes(&self) -> Vec<u8> {
        let mut out = envelope_bytes(&self.header, &self.prev_hash, self.signature.as_bytes());
        out.push(self.empty as u8);
        out.extend_from_slice(self.score.as_bytes());
        out
    }
}

/// What travels on the `Agreement` wire topic: either a vote-set agreement
/// or a binary tie-break vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgreementPayload {
    /// The result of a successful double reduction
    Set(AgreementMessage),
    /// A vote in the binary agreement loop
    Binary(BinaryMessage),
}

impl AgreementPayload {
    /// The uniform header of the inner message.
    pub fn header(&self) -> &ConsensusHeader {
        match self {
            AgreementPayload::Set(msg) => &msg.header,
            AgreementPayload::Binary(msg) => &msg.header,
        }
    }
}

/// A candidate block, signed by its generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMessage {
    /// The proposed block
    pub block: Block,
    /// Generator's Ed25519 key
    pub ed_key: [u8; 32],
    /// Generator's Ed25519 signature over the block hash
    pub ed_signature: EdSignatureBytes,
}

/// Handshake announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    /// Protocol version
    pub version: u32,
    /// Sender's wall clock, seconds
    pub timestamp: i64,
    /// Service flag bitset
    pub services: u64,
}

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 10_000;
/// Full-node service flag.
pub const SERVICE_NODE: u64 = 1;

fn envelope_bytes(header: &ConsensusHeader, prev_hash: &Hash, inner_sig: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 1 + 32 + 32 + inner_sig.len());
    out.extend_from_slice(&header.round.to_le_bytes());
    out.push(header.step);
    out.extend_from_slice(header.block_hash.as_bytes());
    out.extend_from_slice(prev_hash.as_bytes());
    out.extend_from_slice(inner_sig);
    out
}

/// A typed payload paired with its topic.
///
/// Wire topics round-trip through [`Payload::encode`] /
/// [`Payload::decode`]; bus-only topics (`Gossip`, `AcceptedBlock`) ride the
/// event bus and are never framed.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Handshake announcement
    Version(VersionMessage),
    /// Handshake acknowledgement
    VerAck,
    /// Keepalive probe
    Ping,
    /// Keepalive response
    Pong,
    /// Request for inventory items
    GetData(InvMessage),
    /// Request successor blocks of the newest known locator
    GetBlocks(Vec<Hash>),
    /// A transaction
    Tx(ContractCall),
    /// A full block
    Block(Box<Block>),
    /// A locally accepted block (bus-only)
    AcceptedBlock(Box<Block>),
    /// Request the remote pool's inventory
    MemPool,
    /// Inventory advertisement
    Inv(InvMessage),
    /// A candidate block
    Candidate(Box<CandidateMessage>),
    /// A score proposal
    Score(Box<ScoreMessage>),
    /// A reduction vote
    Reduction(Box<ReductionMessage>),
    /// An agreement or binary tie-break vote
    Agreement(Box<AgreementPayload>),
    /// Request a candidate by hash
    GetCandidate(Hash),
    /// A ready-to-write frame on the outbound gossip stream (bus-only)
    Gossip(Frame),
    /// A frame relayed over the kadcast overlay with its remaining height
    Kadcast {
        /// Remaining kadcast propagation height
        height: u8,
        /// The framed message being relayed
        frame: Frame,
    },
}

impl Payload {
    /// The topic this payload belongs to.
    pub fn topic(&self) -> Topic {
        match self {
            Payload::Version(_) => Topic::Version,
            Payload::VerAck => Topic::VerAck,
            Payload::Ping => Topic::Ping,
            Payload::Pong => Topic::Pong,
            Payload::GetData(_) => Topic::GetData,
            Payload::GetBlocks(_) => Topic::GetBlocks,
            Payload::Tx(_) => Topic::Tx,
            Payload::Block(_) => Topic::Block,
            Payload::AcceptedBlock(_) => Topic::AcceptedBlock,
            Payload::MemPool => Topic::MemPool,
            Payload::Inv(_) => Topic::Inv,
            Payload::Candidate(_) => Topic::Candidate,
            Payload::Score(_) => Topic::Score,
            Payload::Reduction(_) => Topic::Reduction,
            Payload::Agreement(_) => Topic::Agreement,
            Payload::GetCandidate(_) => Topic::GetCandidate,
            Payload::Gossip(_) => Topic::Gossip,
            Payload::Kadcast { .. } => Topic::Kadcast,
        }
    }

    /// Encode the payload body (the bytes after the topic byte).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let enc = |r: bincode::Result<Vec<u8>>| {
            r.map_err(|e| WireError::PayloadEncode(e.to_string()))
        };
        match self {
            Payload::VerAck | Payload::Ping | Payload::Pong | Payload::MemPool => Ok(Vec::new()),
            Payload::Version(v) => enc(bincode::serialize(v)),
            Payload::GetData(inv) | Payload::Inv(inv) => Ok(inv.to_bytes()),
            Payload::GetBlocks(locators) => enc(bincode::serialize(locators)),
            Payload::Tx(tx) => enc(bincode::serialize(tx)),
            Payload::Block(b) | Payload::AcceptedBlock(b) => enc(bincode::serialize(b)),
            Payload::Candidate(c) => enc(bincode::serialize(c)),
            Payload::Score(s) => enc(bincode::serialize(s)),
            Payload::Reduction(r) => enc(bincode::serialize(r)),
            Payload::Agreement(a) => enc(bincode::serialize(a)),
            Payload::GetCandidate(hash) => enc(bincode::serialize(hash)),
            Payload::Gossip(frame) => Ok(frame.payload.clone()),
            Payload::Kadcast { height, frame } => {
                let mut out = vec![*height, frame.topic.as_byte()];
                out.extend_from_slice(&frame.payload);
                Ok(out)
            }
        }
    }

    /// Decode a payload body for a topic.
    pub fn decode(topic: Topic, bytes: &[u8]) -> Result<Payload> {
        let dec_err = |e: bincode::Error| WireError::PayloadDecode(e.to_string());
        match topic {
            Topic::Version => Ok(Payload::Version(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::VerAck => Ok(Payload::VerAck),
            Topic::Ping => Ok(Payload::Ping),
            Topic::Pong => Ok(Payload::Pong),
            Topic::GetData => Ok(Payload::GetData(InvMessage::from_bytes(bytes)?)),
            Topic::Inv => Ok(Payload::Inv(InvMessage::from_bytes(bytes)?)),
            Topic::GetBlocks => Ok(Payload::GetBlocks(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::Tx => Ok(Payload::Tx(bincode::deserialize(bytes).map_err(dec_err)?)),
            Topic::Block => Ok(Payload::Block(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::AcceptedBlock => Ok(Payload::AcceptedBlock(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::MemPool => Ok(Payload::MemPool),
            Topic::Candidate => Ok(Payload::Candidate(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::Score => Ok(Payload::Score(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::Reduction => Ok(Payload::Reduction(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::Agreement => Ok(Payload::Agreement(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::GetCandidate => Ok(Payload::GetCandidate(
                bincode::deserialize(bytes).map_err(dec_err)?,
            )),
            Topic::Kadcast => {
                if bytes.len() < 2 {
                    return Err(WireError::PayloadDecode("kadcast too short".into()));
                }
                Ok(Payload::Kadcast {
                    height: bytes[0],
                    frame: Frame::new(Topic::from_byte(bytes[1]), bytes[2..].to_vec()),
                })
            }
            other => Err(WireError::TopicMismatch(other)),
        }
    }

    /// Build a wire frame for this payload.
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::new(self.topic(), self.encode()?))
    }

    /// Content hash of the encoded payload, used by the dedup filters.
    pub fn content_hash(&self) -> [u8; 32] {
        let bytes = self.encode().unwrap_or_default();
        umbra_crypto::hash::sha3_256_multi(&[&[self.topic().as_byte()], &bytes])
    }
}

/// RPC bus request payloads.
#[derive(Debug, Clone)]
pub enum RpcCall {
    /// Fetch verified mempool txs, optionally one by hash
    GetMempoolTxs {
        /// Optional hash filter
        filter: Option<Hash>,
    },
    /// Fetch highest-fee txs up to a byte budget
    GetMempoolTxsBySize {
        /// Total encoded-size budget in bytes
        max_bytes: u32,
    },
    /// Submit a transaction to the mempool
    SendMempoolTx(ContractCall),
    /// Mempool txs of the given types, for wallet views
    GetMempoolView(Vec<umbra_types::CallType>),
    /// Unconfirmed balance of a view key
    GetUnconfirmedBalance(Vec<u8>),
    /// Validate a candidate block before voting on it
    VerifyCandidateBlock(Box<Block>),
    /// Fetch a candidate block by hash
    GetCandidate(Hash),
    /// Current sync progress
    GetSyncProgress,
}

impl RpcCall {
    /// The bus topic this call is routed on.
    pub fn topic(&self) -> Topic {
        match self {
            RpcCall::GetMempoolTxs { .. } => Topic::GetMempoolTxs,
            RpcCall::GetMempoolTxsBySize { .. } => Topic::GetMempoolTxsBySize,
            RpcCall::SendMempoolTx(_) => Topic::SendMempoolTx,
            RpcCall::GetMempoolView(_) => Topic::GetMempoolView,
            RpcCall::GetUnconfirmedBalance(_) => Topic::GetUnconfirmedBalance,
            RpcCall::VerifyCandidateBlock(_) => Topic::VerifyStateTransition,
            RpcCall::GetCandidate(_) => Topic::GetCandidate,
            RpcCall::GetSyncProgress => Topic::GetSyncProgress,
        }
    }
}

/// RPC bus response payloads.
#[derive(Debug, Clone)]
pub enum RpcReply {
    /// A list of transactions
    Txs(Vec<ContractCall>),
    /// A transaction hash (successful submission)
    TxHash(Hash),
    /// A balance amount
    Balance(u64),
    /// A candidate block
    Candidate(Box<Block>),
    /// Sync progress as a fraction in `[0, 1]`
    SyncProgress(f32),
    /// Success without data
    Empty,
}
