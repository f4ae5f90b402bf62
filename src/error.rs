use std::time::Duration;

use thiserror::Error;

/// Reason a proxy descriptor line was rejected by the parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("expected 4 colon-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid IPv4 address: {0}")]
    InvalidIp(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("{0} must not contain ':' or whitespace")]
    IllegalCharacter(&'static str),
}

/// Unified error type for the rotor engine
#[derive(Error, Debug)]
pub enum RotorError {
    // Pool exhaustion
    #[error("No API keys available")]
    NoKeysAvailable,

    #[error("No healthy proxy available")]
    NoHealthyProxy,

    // Admission
    #[error("Rate limited, retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    #[error("All keys throttled, retry after {retry_after:?}")]
    AllThrottled { retry_after: Duration },

    // Per-attempt upstream failures
    #[error("Credential rejected by upstream (status {status})")]
    CredentialInvalid { status: u16 },

    #[error("Upstream returned status {status}")]
    UpstreamStatus { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Attempt timed out")]
    Timeout,

    // Final dispatch outcome
    #[error("Retries exhausted after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<RotorError>,
    },

    // Administrative operations
    #[error("Proxy not found: {id}")]
    ProxyNotFound { id: u64 },

    #[error("Key not found")]
    KeyNotFound,

    #[error("Invalid proxy descriptor: {0}")]
    InvalidDescriptor(#[from] DescriptorError),

    // Configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for rotor operations
pub type Result<T> = std::result::Result<T, RotorError>;

impl RotorError {
    /// Whether the dispatcher may retry this failure with a different key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RotorError::CredentialInvalid { .. }
                | RotorError::UpstreamStatus { .. }
                | RotorError::Network(_)
                | RotorError::Timeout
        )
    }

    /// Whether this failure happened at the network layer, before the
    /// upstream could have seen the request.
    pub fn is_network(&self) -> bool {
        matches!(self, RotorError::Network(_))
    }
}
