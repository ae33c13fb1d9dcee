//! Error types for the node.

use thiserror::Error;

/// Result type for node operations.
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors that can occur inside a storage node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport failure.
    #[error(transparent)]
    Proto(#[from] shopsync_proto::ProtoError),

    /// Local store failure.
    #[error(transparent)]
    Storage(#[from] shopsync_storage::StorageError),

    /// A payload that should have been a shopping list was not.
    #[error("invalid list payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// The node has not (yet) been given a ring.
    #[error("ring is empty")]
    EmptyRing,
}
