//! Core type definitions for ShopSync.
//!
//! This crate defines the fundamental identifiers used throughout the store:
//! - [`ListId`] — shopping-list identifier (UUID v4)
//! - [`ReplicaId`] — opaque per-client replica identity for CRDT updates
//! - [`NodeAddr`] — network address of a storage node or router
//! - [`QuorumId`] — quorum correlation id, with a typed read-repair sentinel
//!
//! Domain logic (CRDTs, ring, protocol) lives in the sibling crates, not here.

mod ids;

pub use ids::{ListId, NodeAddr, QuorumId, ReplicaId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("replica id must not be empty")]
    EmptyReplicaId,
}
