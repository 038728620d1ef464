//! Wire and bus topics.
//!
//! Ordinals are part of the wire protocol and must never be reordered; the
//! `ordinals_are_stable` test pins them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every topic a frame or bus message can carry.
///
/// The first block of ordinals travels on the wire; later ordinals are
/// internal bus and RPC topics that never leave the process but share the
/// same namespace, mirroring the single topic byte in the frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Topic {
    /// Handshake: version announcement
    Version = 0,
    /// Handshake: version acknowledgement
    VerAck = 1,
    /// Keepalive probe
    Ping = 2,
    /// Keepalive response
    Pong = 3,
    /// Request for inventory items
    GetData = 4,
    /// Request for successor blocks of a locator
    GetBlocks = 5,
    /// A single transaction
    Tx = 6,
    /// A full block
    Block = 7,
    /// A block accepted by this node (internal announcement)
    AcceptedBlock = 8,
    /// Request for the remote mempool's inventory
    MemPool = 9,
    /// Inventory advertisement
    Inv = 10,
    /// A candidate block
    Candidate = 11,
    /// A blind-bid score proposal
    Score = 12,
    /// A reduction vote
    Reduction = 13,
    /// An agreement message
    Agreement = 14,
    /// The outbound gossip stream (bus-only carrier topic)
    Gossip = 15,
    /// Unknown topic byte
    Unknown = 16,
    /// Protocol rejection
    Reject = 17,
    /// Process shutdown (internal)
    Quit = 18,
    /// Log relay (internal)
    Log = 19,
    /// Monitoring relay (internal)
    Monitor = 20,
    /// Test-only topic
    Test = 21,
    /// RPC: fetch verified mempool txs
    GetMempoolTxs = 22,
    /// RPC: fetch highest-fee txs up to a size budget
    GetMempoolTxsBySize = 23,
    /// RPC: submit a tx to the mempool
    SendMempoolTx = 24,
    /// RPC: validate a state transition via the oracle
    VerifyStateTransition = 25,
    /// RPC: execute a state transition via the oracle
    ExecuteStateTransition = 26,
    /// RPC: mempool view for wallets
    GetMempoolView = 27,
    /// RPC: create a wallet
    CreateWallet = 28,
    /// RPC: create a wallet from seed
    CreateFromSeed = 29,
    /// RPC: load a wallet
    LoadWallet = 30,
    /// RPC: send a bid transaction
    SendBidTx = 31,
    /// RPC: send a stake transaction
    SendStakeTx = 32,
    /// RPC: send a standard transaction
    SendStandardTx = 33,
    /// RPC: confirmed balance
    GetBalance = 34,
    /// RPC: unconfirmed (mempool) balance
    GetUnconfirmedBalance = 35,
    /// RPC: wallet address
    GetAddress = 36,
    /// RPC: transaction history
    GetTxHistory = 37,
    /// RPC: automate consensus txs
    AutomateConsensusTxs = 38,
    /// RPC: sync progress fraction
    GetSyncProgress = 39,
    /// RPC: wallet load state
    IsWalletLoaded = 40,
    /// RPC: rebuild chain state
    RebuildChain = 41,
    /// RPC: clear wallet database
    ClearWalletDatabase = 42,
    /// RPC: start a CPU profile
    StartProfile = 43,
    /// RPC: stop a CPU profile
    StopProfile = 44,
    /// Request a candidate block by hash
    GetCandidate = 45,
    /// Monitoring: sync progress announcements
    SyncProgress = 46,
    /// Kadcast wire messaging
    Kadcast = 47,
}

impl Topic {
    /// All defined topics, in ordinal order.
    pub const ALL: &'static [Topic] = &[
        Topic::Version,
        Topic::VerAck,
        Topic::Ping,
        Topic::Pong,
        Topic::GetData,
        Topic::GetBlocks,
        Topic::Tx,
        Topic::Block,
        Topic::AcceptedBlock,
        Topic::MemPool,
        Topic::Inv,
        Topic::Candidate,
        Topic::Score,
        Topic::Reduction,
        Topic::Agreement,
        Topic::Gossip,
        Topic::Unknown,
        Topic::Reject,
        Topic::Quit,
        Topic::Log,
        Topic::Monitor,
        Topic::Test,
        Topic::GetMempoolTxs,
        Topic::GetMempoolTxsBySize,
        Topic::SendMempoolTx,
        Topic::VerifyStateTransition,
        Topic::ExecuteStateTransition,
        Topic::GetMempoolView,
        Topic::CreateWallet,
        Topic::CreateFromSeed,
        Topic::LoadWallet,
        Topic::SendBidTx,
        Topic::SendStakeTx,
        Topic::SendStandardTx,
        Topic::GetBalance,
        Topic::GetUnconfirmedBalance,
        Topic::GetAddress,
        Topic::GetTxHistory,
        Topic::AutomateConsensusTxs,
        Topic::GetSyncProgress,
        Topic::IsWalletLoaded,
        Topic::RebuildChain,
        Topic::ClearWalletDatabase,
        Topic::StartProfile,
        Topic::StopProfile,
        Topic::GetCandidate,
        Topic::SyncProgress,
        Topic::Kadcast,
    ];

    /// Decode a topic byte; unmapped bytes become [`Topic::Unknown`].
    pub fn from_byte(byte: u8) -> Topic {
        Topic::ALL
            .get(byte as usize)
            .copied()
            .unwrap_or(Topic::Unknown)
    }

    /// The wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether frames with this topic are re-broadcast to other peers.
    pub fn is_gossiped(self) -> bool {
        matches!(
            self,
            Topic::Tx
                | Topic::Block
                | Topic::Candidate
                | Topic::Score
                | Topic::Reduction
                | Topic::Agreement
        )
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Topic::Version => "version",
            Topic::VerAck => "verack",
            Topic::Ping => "ping",
            Topic::Pong => "pong",
            Topic::GetData => "getdata",
            Topic::GetBlocks => "getblocks",
            Topic::Tx => "tx",
            Topic::Block => "block",
            Topic::AcceptedBlock => "acceptedblock",
            Topic::MemPool => "mempool",
            Topic::Inv => "inv",
            Topic::Candidate => "candidate",
            Topic::Score => "score",
            Topic::Reduction => "reduction",
            Topic::Agreement => "agreement",
            Topic::Gossip => "gossip",
            Topic::Unknown => "unknown",
            Topic::Reject => "reject",
            Topic::Quit => "quit",
            Topic::Log => "log",
            Topic::Monitor => "monitor",
            Topic::Test => "__test",
            Topic::GetMempoolTxs => "getmempooltxs",
            Topic::GetMempoolTxsBySize => "getmempooltxsbysize",
            Topic::SendMempoolTx => "sendmempooltx",
            Topic::VerifyStateTransition => "verifystatetransition",
            Topic::ExecuteStateTransition => "executestatetransition",
            Topic::GetMempoolView => "getmempoolview",
            Topic::CreateWallet => "createwallet",
            Topic::CreateFromSeed => "createfromseed",
            Topic::LoadWallet => "loadwallet",
            Topic::SendBidTx => "sendbidtx",
            Topic::SendStakeTx => "sendstaketx",
            Topic::SendStandardTx => "sendstandardtx",
            Topic::GetBalance => "getbalance",
            Topic::GetUnconfirmedBalance => "getunconfirmedbalance",
            Topic::GetAddress => "getaddress",
            Topic::GetTxHistory => "gettxhistory",
            Topic::AutomateConsensusTxs => "automateconsensustxs",
            Topic::GetSyncProgress => "getsyncprogress",
            Topic::IsWalletLoaded => "iswalletloaded",
            Topic::RebuildChain => "rebuildchain",
            Topic::ClearWalletDatabase => "clearwalletdatabase",
            Topic::StartProfile => "startprofile",
            Topic::StopProfile => "stopprofile",
            Topic::GetCandidate => "getcandidate",
            Topic::SyncProgress => "syncprogress",
            Topic::Kadcast => "kadcast",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_are_stable() {
        assert_eq!(Topic::Version.as_byte(), 0);
        assert_eq!(Topic::Tx.as_byte(), 6);
        assert_eq!(Topic::Block.as_byte(), 7);
        assert_eq!(Topic::Inv.as_byte(), 10);
        assert_eq!(Topic::Candidate.as_byte(), 11);
        assert_eq!(Topic::Score.as_byte(), 12);
        assert_eq!(Topic::Reduction.as_byte(), 13);
        assert_eq!(Topic::Agreement.as_byte(), 14);
        assert_eq!(Topic::Unknown.as_byte(), 16);
        assert_eq!(Topic::GetCandidate.as_byte(), 45);
        assert_eq!(Topic::SyncProgress.as_byte(), 46);
        assert_eq!(Topic::Kadcast.as_byte(), 47);

        // ALL must be indexed by ordinal for from_byte to be correct.
        for (i, topic) in Topic::ALL.iter().enumerate() {
            assert_eq!(topic.as_byte() as usize, i, "ordinal gap at {}", i);
        }
    }

    #[test]
    fn unmapped_bytes_are_unknown() {
        assert_eq!(Topic::from_byte(200), Topic::Unknown);
        assert_eq!(Topic::from_byte(48), Topic::Unknown);
        assert_eq!(Topic::from_byte(13), Topic::Reduction);
    }
}
