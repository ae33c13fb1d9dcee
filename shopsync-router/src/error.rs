//! Error types for the router.

use crate::bstar::BStarError;
use thiserror::Error;

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors that can occur inside a router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Transport failure.
    #[error(transparent)]
    Proto(#[from] shopsync_proto::ProtoError),

    /// State-link failure.
    #[error("state link error: {0}")]
    StateLink(#[from] std::io::Error),

    /// Split-brain detected; the process must abort.
    #[error(transparent)]
    SplitBrain(#[from] BStarError),
}
