//! JSON-RPC client for the orchestrator oracle.
//!
//! The orchestrator exposes the scoring, verification and state-transition
//! surface as an RPC server; this client maps every [`Oracle`] method onto
//! an `oracle_*` RPC call with the per-kind deadlines from the node
//! configuration. Transport failures and deadline misses surface as the
//! transient error kinds, so callers retry with backoff instead of treating
//! a hiccup as a verdict.

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use std::time::Duration;

use umbra_oracle::{
    ExecuteResponse, GenerateScoreRequest, GenerateScoreResponse, Oracle, OracleError,
    OracleTimeouts, Result, VerifyScoreRequest,
};
use umbra_types::{Block, ContractCall, Hash};

/// An [`Oracle`] backed by the orchestrator's RPC server.
pub struct RpcOracle {
    client: HttpClient,
    timeouts: OracleTimeouts,
}

impl RpcOracle {
    /// Connect to the orchestrator at `address` (host:port).
    pub fn connect(address: &str, timeouts: OracleTimeouts) -> Result<Self> {
        let url = format!("http://{}", address);
        let client = HttpClientBuilder::default()
            .request_timeout(timeouts.default_timeout)
            .build(url)
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;
        Ok(Self { client, timeouts })
    }

    async fn call<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: jsonrpsee::core::params::ArrayParams,
        deadline: Duration,
    ) -> Result<R> {
        let request = self.client.request::<R, _>(method, params);
        match tokio::time::timeout(deadline, request).await {
            Err(_) => Err(OracleError::Timeout(deadline)),
            Ok(Err(e)) => Err(map_rpc_error(e)),
            Ok(Ok(value)) => Ok(value),
        }
    }
}

fn map_rpc_error(e: jsonrpsee::core::ClientError) -> OracleError {
    match e {
        jsonrpsee::core::ClientError::Call(call) => {
            // The orchestrator reports domain rejections as error objects.
            let message = call.message().to_string();
            if message.contains("not in the bid list") {
                OracleError::NotABidder
            } else {
                OracleError::VerificationFailed(message)
            }
        }
        jsonrpsee::core::ClientError::RequestTimeout => {
            OracleError::Timeout(Duration::from_secs(0))
        }
        other => OracleError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl Oracle for RpcOracle {
    async fn echo(&self) -> Result<()> {
        self.call::<bool>("oracle_echo", rpc_params![], self.timeouts.default_timeout)
            .await
            .map(|_| ())
    }

    async fn generate_score(&self, req: GenerateScoreRequest) -> Result<GenerateScoreResponse> {
        self.call(
            "oracle_generateScore",
            rpc_params![req],
            self.timeouts.default_timeout,
        )
        .await
    }

    async fn verify_score(&self, req: VerifyScoreRequest) -> Result<bool> {
        self.call(
            "oracle_verifyScore",
            rpc_params![req],
            self.timeouts.default_timeout,
        )
        .await
    }

    async fn generate_secret_key(&self, seed: &[u8]) -> Result<Vec<u8>> {
        let encoded: String = self
            .call(
                "oracle_generateSecretKey",
                rpc_params![hex::encode(seed)],
                self.timeouts.default_timeout,
            )
            .await?;
        hex::decode(encoded).map_err(|e| OracleError::Protocol(e.to_string()))
    }

    async fn verify_transaction(&self, call: &ContractCall) -> Result<bool> {
        self.call(
            "oracle_verifyTransaction",
            rpc_params![call],
            self.timeouts.tx_timeout,
        )
        .await
    }

    async fn calculate_balance(&self, view_key: &[u8], calls: &[ContractCall]) -> Result<u64> {
        self.call(
            "oracle_calculateBalance",
            rpc_params![hex::encode(view_key), calls],
            self.timeouts.default_timeout,
        )
        .await
    }

    async fn validate_state_transition(
        &self,
        calls: &[ContractCall],
        height: u64,
    ) -> Result<Vec<usize>> {
        self.call(
            "oracle_validateStateTransition",
            rpc_params![calls, height],
            self.timeouts.default_timeout,
        )
        .await
    }

    async fn execute_state_transition(&self, block: &Block) -> Result<ExecuteResponse> {
        self.call(
            "oracle_executeStateTransition",
            rpc_params![block],
            self.timeouts.default_timeout,
        )
        .await
    }
}

/// The commitment key under which a node's own bid secrets are stored.
pub fn own_bid_key(bls_key: &[u8; 48]) -> Hash {
    Hash::sha3(bls_key)
}
