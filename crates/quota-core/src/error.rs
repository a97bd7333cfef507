//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or validating a quota config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate pool id: {0}")]
    DuplicatePool(String),

    #[error("empty {0} id")]
    EmptyId(&'static str),

    #[error("account {account}: set either max_balance or max_charge_seconds, not both")]
    ConflictingCap { account: String },

    #[error("account {account}: {field} must not be negative")]
    Negative { account: String, field: &'static str },

    #[error("account {account}: {field} must be finite")]
    NonFinite { account: String, field: &'static str },
}
