//! Error types for configuration handling.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Invalid or conflicting configuration, detected before any networking.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid ip address: {0}")]
    InvalidIp(String),

    #[error("invalid network specification '{spec}': {reason}")]
    InvalidNetwork { spec: String, reason: String },

    #[error("invalid port {0}: port and port+1 must both be in 1..=65535")]
    InvalidPort(u32),

    #[error("invalid ice root: {0}")]
    InvalidIceRoot(String),

    #[error("cloud name must not be empty")]
    EmptyCloudName,

    #[error("thread count must be at least 1")]
    InvalidThreads,
}
