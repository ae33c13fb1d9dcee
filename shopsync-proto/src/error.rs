//! Error types for the protocol layer.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors that can occur in framing and transport.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Network error (connect, read or write failed).
    #[error("network error: {0}")]
    Network(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Frame exceeds the configured maximum.
    #[error("message too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Peer is not reachable through this transport.
    #[error("peer not reachable: {0}")]
    Unreachable(String),

    /// The transport is shutting down.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<std::io::Error> for ProtoError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}
