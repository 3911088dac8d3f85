// Lease protocol error types and result aliases

use thiserror::Error;

use crate::config::ConfigError;

/// Result type for lease operations
pub type LeaseResult<T> = Result<T, LeaseError>;

/// Failures of the outbound HTTP exchange itself
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The exchange did not finish in time
    #[error("Request timed out")]
    Timeout,

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// Any other transport level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The worker executing the request went away before completing it
    #[error("Request was dropped before completion")]
    Dropped,
}

impl TransportError {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a TLS error
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Lease request failures
///
/// Only [`LeaseError::ProtocolViolation`] is fatal: the server answered with
/// success but broke the response contract.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    /// The endpoint configuration cannot produce a request
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The HTTP exchange failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status
    #[error("Server responded with HTTP {status}{}", status_detail(.body))]
    Status { status: u16, body: String },

    /// A success response without the lease identifier
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The scheduler is no longer running
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

fn status_detail(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

impl LeaseError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a protocol violation error
    pub fn protocol_violation(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Whether the failure breaks the server contract rather than the exchange
    pub fn is_fatal(&self) -> bool {
        matches!(self, LeaseError::ProtocolViolation(_))
    }
}

impl From<ConfigError> for LeaseError {
    fn from(err: ConfigError) -> Self {
        LeaseError::Configuration(err.to_string())
    }
}
