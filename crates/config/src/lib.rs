//! # Umbra Config
//!
//! All node settings live in one `umbra.toml` file, parsed into [`Config`]
//! and validated before anything else starts. CLI flags override
//! individual fields after loading.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;

pub use config::{
    Config, ConsensusConfig, LoggingConfig, MempoolConfig, NetworkConfig, OracleConfig,
    StorageConfig,
};
pub use error::{ConfigError, ConfigResult};
