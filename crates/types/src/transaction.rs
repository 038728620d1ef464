//! Contract calls (transactions).
//!
//! Every state mutation is a contract call. The node never executes them:
//! verification and state transitions are delegated to the oracle; locally a
//! call is content-addressed bytes with a fee and a type tag.

use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::keys::PublicKeyBytes;
use crate::Result;

/// Discriminant of a contract call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallType {
    /// Value transfer between notes
    Transfer,
    /// Coinbase reward distribution; only the block generator may emit it
    Distribute,
    /// Lock value as provisioner stake
    Stake,
    /// Commit to a blind bid for block generation
    Bid,
    /// Release an expired stake
    WithdrawStake,
    /// Release an expired bid
    WithdrawBid,
    /// Collect accumulated generator fees
    WithdrawFees,
    /// Punish a provisioner for double-signing
    Slash,
}

impl std::fmt::Display for CallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallType::Transfer => "transfer",
            CallType::Distribute => "distribute",
            CallType::Stake => "stake",
            CallType::Bid => "bid",
            CallType::WithdrawStake => "withdraw_stake",
            CallType::WithdrawBid => "withdraw_bid",
            CallType::WithdrawFees => "withdraw_fees",
            CallType::Slash => "slash",
        };
        write!(f, "{}", s)
    }
}

/// A transaction: tagged union over the call kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractCall {
    /// Value transfer
    Transfer(Transfer),
    /// Coinbase; generator-only
    Distribute(Distribute),
    /// Stake lock-up
    Stake(StakeCall),
    /// Blind-bid commitment
    Bid(BidCall),
    /// Stake withdrawal
    WithdrawStake(WithdrawStake),
    /// Bid withdrawal
    WithdrawBid(WithdrawBid),
    /// Generator fee withdrawal
    WithdrawFees(WithdrawFees),
    /// Slashing evidence
    Slash(Slash),
}

/// Value transfer between shielded notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Fee offered to the generator
    pub fee: u64,
    /// Spent note nullifiers
    pub nullifiers: Vec<Hash>,
    /// Output note commitments
    pub outputs: Vec<Hash>,
    /// Opaque range proof, verified by the oracle
    pub proof: Vec<u8>,
}

/// Coinbase reward distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribute {
    /// Block reward being distributed
    pub reward: u64,
    /// BLS key of the generator being paid
    pub generator: PublicKeyBytes,
}

/// Stake lock-up making the sender a provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeCall {
    /// Fee offered to the generator
    pub fee: u64,
    /// Amount locked
    pub amount: u64,
    /// BLS key the stake is bound to
    pub bls_key: PublicKeyBytes,
    /// Height at which the stake expires
    pub expiration: u64,
}

/// Blind-bid commitment making the sender a candidate generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidCall {
    /// Fee offered to the generator
    pub fee: u64,
    /// Bid commitment `M`
    pub commitment: Hash,
    /// Encrypted bid payload, opened only by the oracle circuits
    pub encrypted_data: Vec<u8>,
    /// Height at which the bid expires
    pub expiration: u64,
}

/// Withdrawal of an expired stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawStake {
    /// Fee offered to the generator
    pub fee: u64,
    /// BLS key that held the stake
    pub bls_key: PublicKeyBytes,
    /// BLS signature authorizing the withdrawal
    pub signature: Vec<u8>,
}

/// Withdrawal of an expired bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawBid {
    /// Fee offered to the generator
    pub fee: u64,
    /// Bid commitment being withdrawn
    pub commitment: Hash,
    /// Opening proof, verified by the oracle
    pub proof: Vec<u8>,
}

/// Withdrawal of accumulated generator fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawFees {
    /// Fee offered to the generator
    pub fee: u64,
    /// BLS key of the generator
    pub bls_key: PublicKeyBytes,
    /// BLS signature authorizing the withdrawal
    pub signature: Vec<u8>,
}

/// Slashing evidence against an equivocating provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slash {
    /// Fee offered to the generator
    pub fee: u64,
    /// BLS key of the culprit
    pub culprit: PublicKeyBytes,
    /// Round of the offense
    pub round: u64,
    /// Step of the offense
    pub step: u8,
    /// First conflicting signature
    pub first_signature: Vec<u8>,
    /// Second conflicting signature
    pub second_signature: Vec<u8>,
}

impl ContractCall {
    /// The call's type tag.
    pub fn call_type(&self) -> CallType {
        match self {
            ContractCall::Transfer(_) => CallType::Transfer,
            ContractCall::Distribute(_) => CallType::Distribute,
            ContractCall::Stake(_) => CallType::Stake,
            ContractCall::Bid(_) => CallType::Bid,
            ContractCall::WithdrawStake(_) => CallType::WithdrawStake,
            ContractCall::WithdrawBid(_) => CallType::WithdrawBid,
            ContractCall::WithdrawFees(_) => CallType::WithdrawFees,
            ContractCall::Slash(_) => CallType::Slash,
        }
    }

    /// Whether this call is the coinbase.
    pub fn is_coinbase(&self) -> bool {
        matches!(self, ContractCall::Distribute(_))
    }

    /// Fee offered to the block generator. Coinbase carries none.
    pub fn fee(&self) -> u64 {
        match self {
            ContractCall::Transfer(c) => c.fee,
            ContractCall::Distribute(_) => 0,
            ContractCall::Stake(c) => c.fee,
            ContractCall::Bid(c) => c.fee,
            ContractCall::WithdrawStake(c) => c.fee,
            ContractCall::WithdrawBid(c) => c.fee,
            ContractCall::WithdrawFees(c) => c.fee,
            ContractCall::Slash(c) => c.fee,
        }
    }

    /// Canonical binary encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from the canonical binary encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Size of the canonical encoding in bytes.
    pub fn size(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(0)
    }

    /// Content hash: Sha3-256 of the canonical encoding.
    pub fn hash(&self) -> Hash {
        match self.encode() {
            Ok(bytes) => Hash::sha3(&bytes),
            Err(_) => Hash::NIL,
        }
    }

    /// Fee per encoded byte, the mempool's ordering key.
    pub fn fee_per_byte(&self) -> u64 {
        let size = self.size().max(1) as u64;
        self.fee() / size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(fee: u64) -> ContractCall {
        ContractCall::Transfer(Transfer {
            fee,
            nullifiers: vec![Hash::sha3(b"n1")],
            outputs: vec![Hash::sha3(b"o1"), Hash::sha3(b"o2")],
            proof: vec![0u8; 64],
        })
    }

    #[test]
    fn hash_is_content_addressed() {
        assert_eq!(transfer(10).hash(), transfer(10).hash());
        assert_ne!(transfer(10).hash(), transfer(11).hash());
    }

    #[test]
    fn encode_round_trip() {
        let call = transfer(42);
        let bytes = call.encode().unwrap();
        assert_eq!(ContractCall::decode(&bytes).unwrap(), call);
        assert_eq!(bytes.len(), call.size());
    }

    #[test]
    fn coinbase_detection() {
        let coinbase = ContractCall::Distribute(Distribute {
            reward: 50,
            generator: PublicKeyBytes::ZERO,
        });
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.fee(), 0);
        assert!(!transfer(1).is_coinbase());
    }
}
