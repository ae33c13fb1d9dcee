//! CRDT implementations for ShopSync.
//!
//! This crate provides the state-based CRDTs that back every shopping list:
//!
//! - [`GCounter`] — grow-only counter with a per-replica causal clock
//! - [`PNCounter`] — positive-negative counter (two G-Counters)
//! - [`ShoppingListCrdt`] — map from item name to PN-Counter
//! - [`ShoppingList`] — named, identified entity wrapping the CRDT
//!
//! All CRDTs in this crate satisfy the merge laws:
//! - **Commutative**: merge(a, b) == merge(b, a)
//! - **Associative**: merge(merge(a, b), c) == merge(a, merge(b, c))
//! - **Idempotent**: merge(a, a) == a
//!
//! Operations are pure: each returns a new value, so snapshots are cheap and
//! no locks are needed inside merge. Internal maps are `BTreeMap`s, which
//! makes the JSON encoding of equal states byte-identical (sorted keys).

mod g_counter;
mod list_crdt;
mod pn_counter;
mod shopping_list;

pub use g_counter::{CausalOrder, GCounter};
pub use list_crdt::ShoppingListCrdt;
pub use pn_counter::PNCounter;
pub use shopping_list::{ListError, ShoppingList};
