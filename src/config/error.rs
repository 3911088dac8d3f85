// Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while interpreting or persisting endpoint configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The port part of a local UDP endpoint is not an integer
    #[error("Invalid UDP port '{port}' in endpoint '{endpoint}'")]
    InvalidPort { endpoint: String, port: String },

    /// The server URL cannot be parsed
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No configuration file at the given location
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// No server entry matches a selector
    #[error("No server matches '{0}'")]
    NoSuchServer(String),

    /// File content could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration could not be encoded
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a serialization error
    pub fn serialize(msg: impl Into<String>) -> Self {
        Self::Serialize(msg.into())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::parse(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::serialize(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::parse(err.to_string())
    }
}
