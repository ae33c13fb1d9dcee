//! The shopping-list entity: a named, identified wrapper around the CRDT.
//!
//! Contrary to the functional style of the CRDT types, this wrapper is
//! mutable — it is the unit the node stores and the client edits.

use crate::list_crdt::ShoppingListCrdt;
use serde::{Deserialize, Serialize};
use shopsync_types::{ListId, ReplicaId};
use thiserror::Error;

/// Errors from shopping-list operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListError {
    /// `add_item` on a name already present.
    #[error("item {0:?} already exists in the list")]
    DuplicateItem(String),

    /// `change_quantity` on a name never added.
    #[error("item {0:?} does not exist in the list")]
    UnknownItem(String),

    /// Item names must be non-empty.
    #[error("item name must not be empty")]
    EmptyItemName,
}

/// A shopping list: identity, display name, and the item CRDT.
///
/// The name is set once at creation and never merged; two copies with the
/// same id are required by construction to agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingList {
    id: ListId,
    name: String,
    items: ShoppingListCrdt,
}

impl ShoppingList {
    /// Creates an empty list with a fresh id. The name is trimmed.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_id(ListId::new(), name)
    }

    /// Creates an empty list under an existing id.
    #[must_use]
    pub fn with_id(id: ListId, name: &str) -> Self {
        Self {
            id,
            name: name.trim().to_string(),
            items: ShoppingListCrdt::new(),
        }
    }

    /// Rebuilds a list from its parts (deserialized state).
    #[must_use]
    pub fn from_parts(id: ListId, name: String, items: ShoppingListCrdt) -> Self {
        Self { id, name, items }
    }

    /// The list id.
    #[must_use]
    pub fn id(&self) -> ListId {
        self.id
    }

    /// The display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying CRDT.
    #[must_use]
    pub fn items(&self) -> &ShoppingListCrdt {
        &self.items
    }

    /// Quantity of an item (0 if absent).
    #[must_use]
    pub fn quantity(&self, item: &str) -> u64 {
        self.items.value(item)
    }

    /// Adds a new item with an initial quantity. Refuses names already
    /// present (soft-deleted items count as present; re-add via
    /// [`Self::change_quantity`]).
    pub fn add_item(
        &mut self,
        item: &str,
        quantity: u64,
        replica: &ReplicaId,
    ) -> Result<(), ListError> {
        if item.is_empty() {
            return Err(ListError::EmptyItemName);
        }
        if self.items.contains(item) {
            return Err(ListError::DuplicateItem(item.to_string()));
        }
        self.items = self.items.increment(item, replica, quantity);
        Ok(())
    }

    /// Soft-deletes an item: decrements its counter by the current value.
    pub fn remove_item(&mut self, item: &str, replica: &ReplicaId) {
        self.items = self.items.remove(item, replica);
    }

    /// Adjusts an item's quantity by a signed delta. Refuses unknown items.
    pub fn change_quantity(
        &mut self,
        item: &str,
        delta: i64,
        replica: &ReplicaId,
    ) -> Result<(), ListError> {
        if !self.items.contains(item) {
            return Err(ListError::UnknownItem(item.to_string()));
        }
        self.items = if delta >= 0 {
            self.items.increment(item, replica, delta as u64)
        } else {
            self.items.decrement(item, replica, delta.unsigned_abs())
        };
        Ok(())
    }

    /// Merges another copy of the same list into this one.
    ///
    /// Caller guarantees the ids match; the name is taken from self.
    pub fn merge(&mut self, other: &Self) {
        self.items.merge(other.items());
    }

    /// Canonical JSON encoding (sorted keys, compact).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a list from its JSON encoding.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
