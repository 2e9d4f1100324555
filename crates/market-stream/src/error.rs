/*
[INPUT]:  Error sources (transport, handshake, framing, serialization, configuration)
[OUTPUT]: Structured error types with a configuration hint
[POS]:    Error handling layer - unified error type for the public API
[UPDATE]: When adding new error sources or improving error messages
*/

use std::time::Duration;

use thiserror::Error;

use crate::ws::handshake::HandshakeError;

/// Main error type for market-stream
#[derive(Error, Debug)]
pub enum StreamError {
    /// Transport I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket upgrade was rejected or malformed
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Connect plus handshake took too long
    #[error("Connection timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// The connection was closed explicitly
    #[error("Connection closed")]
    Closed,
}

impl StreamError {
    /// Check if the error comes from caller-supplied configuration
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StreamError::Config(_) | StreamError::UrlParse(_) | StreamError::Yaml(_)
        )
    }
}

/// Result type alias for market-stream operations
pub type Result<T> = std::result::Result<T, StreamError>;
