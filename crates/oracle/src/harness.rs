//! Deterministic in-process oracle for tests.
//!
//! Scores are derived as `Sha3-256(k || seed || round || step)`, so a test
//! can pick `k` to land above or below any threshold. Verification accepts
//! everything unless a hash has been explicitly poisoned.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;

use umbra_crypto::hash::sha3_256_multi;
use umbra_types::{Block, ContractCall, Hash, Provisioners};

use crate::{
    ExecuteResponse, GenerateScoreRequest, GenerateScoreResponse, Oracle, OracleError, Result,
    VerifyScoreRequest,
};

/// A deterministic oracle double.
#[derive(Default)]
pub struct HarnessOracle {
    /// Provisioner set returned by state transitions
    provisioners: RwLock<Provisioners>,
    /// Tx hashes that must fail verification
    poisoned: RwLock<HashSet<Hash>>,
    /// When set, every score request fails as "not a bidder"
    not_a_bidder: RwLock<bool>,
    /// Fixed score override; otherwise scores derive from the request
    fixed_score: RwLock<Option<Hash>>,
}

impl HarnessOracle {
    /// A fresh harness oracle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provisioner set reported after state transitions.
    pub fn set_provisioners(&self, provisioners: Provisioners) {
        *self.provisioners.write() = provisioners;
    }

    /// Make `verify_transaction` reject this hash.
    pub fn poison(&self, hash: Hash) {
        self.poisoned.write().insert(hash);
    }

    /// Toggle the "not in the bid list" answer.
    pub fn set_not_a_bidder(&self, value: bool) {
        *self.not_a_bidder.write() = value;
    }

    /// Force every generated score to this value.
    pub fn set_fixed_score(&self, score: Option<Hash>) {
        *self.fixed_score.write() = score;
    }

    /// The deterministic score for a request.
    pub fn derive_score(req: &GenerateScoreRequest) -> Hash {
        Hash::from_bytes(sha3_256_multi(&[
            req.k.as_bytes(),
            req.seed.as_bytes(),
            &req.round.to_le_bytes(),
            &[req.step],
        ]))
    }
}

#[async_trait]
impl Oracle for HarnessOracle {
    async fn echo(&self) -> Result<()> {
        Ok(())
    }

    async fn generate_score(&self, req: GenerateScoreRequest) -> Result<GenerateScoreResponse> {
        if *self.not_a_bidder.read() {
            return Err(OracleError::NotABidder);
        }
        let score = self.fixed_score.read().unwrap_or_else(|| Self::derive_score(&req));
        Ok(GenerateScoreResponse {
            score,
            proof: score.as_bytes().to_vec(),
            identity: Hash::sha3(req.k.as_bytes()),
        })
    }

    async fn verify_score(&self, req: VerifyScoreRequest) -> Result<bool> {
        // The proof is the score itself in the harness.
        Ok(req.proof == req.score.as_bytes().to_vec())
    }

    async fn generate_secret_key(&self, seed: &[u8]) -> Result<Vec<u8>> {
        Ok(umbra_crypto::hash::sha3_256(seed).to_vec())
    }

    async fn verify_transaction(&self, call: &ContractCall) -> Result<bool> {
        if self.poisoned.read().contains(&call.hash()) {
            return Err(OracleError::VerificationFailed("poisoned by test".into()));
        }
        Ok(true)
    }

    async fn calculate_balance(&self, _view_key: &[u8], calls: &[ContractCall]) -> Result<u64> {
        Ok(calls.iter().map(|c| c.fee()).sum())
    }

    async fn validate_state_transition(
        &self,
        calls: &[ContractCall],
        _height: u64,
    ) -> Result<Vec<usize>> {
        Ok((0..calls.len()).collect())
    }

    async fn execute_state_transition(&self, block: &Block) -> Result<ExecuteResponse> {
        Ok(ExecuteResponse {
            state_root: Hash::sha3(block.hash().as_bytes()),
            provisioners: self.provisioners.read().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::Seed;

    fn request() -> GenerateScoreRequest {
        GenerateScoreRequest {
            k: Hash::sha3(b"k"),
            seed: Seed::ZERO,
            secret: Hash::sha3(b"secret"),
            round: 1,
            step: 1,
            stored_bid_index: 0,
        }
    }

    #[tokio::test]
    async fn scores_are_deterministic() {
        let oracle = HarnessOracle::new();
        let a = oracle.generate_score(request()).await.unwrap();
        let b = oracle.generate_score(request()).await.unwrap();
        assert_eq!(a.score, b.score);
    }

    #[tokio::test]
    async fn not_a_bidder_short_circuits() {
        let oracle = HarnessOracle::new();
        oracle.set_not_a_bidder(true);
        assert!(matches!(
            oracle.generate_score(request()).await,
            Err(OracleError::NotABidder)
        ));
    }

    #[tokio::test]
    async fn poisoned_tx_fails_verification() {
        let oracle = HarnessOracle::new();
        let tx = ContractCall::Transfer(umbra_types::transaction::Transfer {
            fee: 1,
            nullifiers: vec![],
            outputs: vec![],
            proof: vec![],
        });
        assert!(oracle.verify_transaction(&tx).await.unwrap());
        oracle.poison(tx.hash());
        assert!(oracle.verify_transaction(&tx).await.is_err());
    }
}
