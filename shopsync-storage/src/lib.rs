//! Durable per-node store for ShopSync.
//!
//! Each storage node keeps one SQLite file mapping list id to the canonical
//! JSON encoding of its shopping list. The store is a recovery log, not the
//! source of truth: the node's in-memory map is authoritative while running,
//! with dirty keys flushed lazily and the whole map written on shutdown.

mod error;
mod list_store;

pub use error::{StorageError, StorageResult};
pub use list_store::ListStore;
