//! Configuration errors.

use std::path::PathBuf;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read config file {path}: {source}")]
    FileRead {
        /// The offending path
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// The file is not valid TOML
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}
