//! Main configuration module.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};

/// All Umbra node settings, loaded from a single `umbra.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Peer network settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Mempool settings
    #[serde(default)]
    pub mempool: MempoolConfig,

    /// Consensus timing
    #[serde(default)]
    pub consensus: ConsensusConfig,

    /// Oracle endpoint and deadlines
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Storage location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!(path = %path.display(), "loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)?;
        debug!("configuration parsed, validating");
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Range and consistency checks.
    pub fn validate(&self) -> ConfigResult<()> {
        self.network.validate()?;
        self.mempool.validate()?;
        self.consensus.validate()?;
        self.oracle.validate()?;
        Ok(())
    }
}

/// Peer network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name: `mainnet`, `testnet` or `devnet`
    pub magic: String,
    /// Listen address for inbound peers
    pub listen_address: String,
    /// Peers dialed at startup
    pub bootstrap_peers: Vec<String>,
    /// Reader idle deadline in seconds
    pub idle_timeout_secs: u64,
    /// Writer inactivity before a keepalive ping, in seconds
    pub keep_alive_secs: u64,
    /// Re-propagate transactions over kadcast instead of gossip inventory
    pub kadcast_enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            magic: "devnet".into(),
            listen_address: "0.0.0.0:7100".into(),
            bootstrap_peers: Vec::new(),
            idle_timeout_secs: 30,
            keep_alive_secs: 15,
            kadcast_enabled: false,
        }
    }
}

impl NetworkConfig {
    fn validate(&self) -> ConfigResult<()> {
        match self.magic.as_str() {
            "mainnet" | "testnet" | "devnet" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown network magic '{}'",
                    other
                )))
            }
        }
        if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "listen_address '{}' is not a socket address",
                self.listen_address
            )));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be > 0".into()));
        }
        if self.keep_alive_secs >= self.idle_timeout_secs {
            return Err(ConfigError::Invalid(
                "keep_alive_secs must be below idle_timeout_secs".into(),
            ));
        }
        Ok(())
    }
}

/// Mempool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Size alarm threshold in megabytes
    pub max_size_mb: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self { max_size_mb: 100 }
    }
}

impl MempoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_size_mb == 0 {
            return Err(ConfigError::Invalid("max_size_mb must be > 0".into()));
        }
        Ok(())
    }
}

/// Consensus timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Base reduction timeout in milliseconds
    pub lambda_ms: u64,
    /// Score selection window in milliseconds
    pub generation_window_ms: u64,
    /// Candidate block byte budget
    pub max_block_bytes: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            lambda_ms: 5_000,
            generation_window_ms: 3_000,
            max_block_bytes: 200_000,
        }
    }
}

impl ConsensusConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.lambda_ms == 0 {
            return Err(ConfigError::Invalid("lambda_ms must be > 0".into()));
        }
        if self.max_block_bytes == 0 {
            return Err(ConfigError::Invalid("max_block_bytes must be > 0".into()));
        }
        Ok(())
    }
}

/// Orchestrator JSON-RPC endpoint and call deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// JSON-RPC (HTTP) address of the orchestrator, as `host:port`
    pub address: String,
    /// Deadline for transaction verification calls, in seconds
    pub tx_timeout_secs: u64,
    /// Deadline for every other call, in seconds
    pub default_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8585".into(),
            tx_timeout_secs: 5,
            default_timeout_secs: 10,
        }
    }
}

impl OracleConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.tx_timeout_secs == 0 || self.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid("oracle timeouts must be > 0".into()));
        }
        Ok(())
    }
}

/// Storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory for the chain database
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/umbra".into(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter, e.g. `info` or `umbra=debug`
    pub level: String,
    /// Output format: `text` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
