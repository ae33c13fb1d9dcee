//! Property-based tests for CRDT correctness.
//!
//! These tests verify the merge laws every CRDT here must satisfy:
//! - Commutativity: merge(A, B) == merge(B, A)
//! - Associativity: merge(merge(A, B), C) == merge(A, merge(B, C))
//! - Idempotence: merge(A, A) == A
//!
//! States are generated from realistic histories: forks of a common base,
//! each fork editing under its own replica identities, the way disconnected
//! clients actually produce divergent copies.

use proptest::prelude::*;
use shopsync_crdt::{PNCounter, ShoppingListCrdt};
use shopsync_types::ReplicaId;

const ITEMS: &[&str] = &["milk", "bread", "apple", "eggs"];

/// One edit: (item index, replica suffix, delta, is_increment).
type Edit = (usize, u8, u64, bool);

fn edits() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(
        (0..ITEMS.len(), 0u8..3, 0u64..20, any::<bool>()),
        0..12,
    )
}

fn replica(prefix: &str, suffix: u8) -> ReplicaId {
    ReplicaId::new(format!("{prefix}-{suffix}")).unwrap()
}

/// Applies edits under replica ids namespaced by `prefix`, so different
/// forks never share an acting replica.
fn apply(base: &ShoppingListCrdt, prefix: &str, edits: &[Edit]) -> ShoppingListCrdt {
    let mut crdt = base.clone();
    for &(item, suffix, delta, is_inc) in edits {
        let r = replica(prefix, suffix);
        crdt = if is_inc {
            crdt.increment(ITEMS[item], &r, delta)
        } else {
            crdt.decrement(ITEMS[item], &r, delta)
        };
    }
    crdt
}

fn apply_pn(base: &PNCounter, prefix: &str, edits: &[Edit]) -> PNCounter {
    let mut counter = base.clone();
    for &(_, suffix, delta, is_inc) in edits {
        let r = replica(prefix, suffix);
        counter = if is_inc {
            counter.increment(&r, delta)
        } else {
            counter.decrement(&r, delta)
        };
    }
    counter
}

mod pn_counter_properties {
    use super::*;

    proptest! {
        #[test]
        fn merge_is_commutative(base in edits(), ea in edits(), eb in edits()) {
            let root = apply_pn(&PNCounter::new(), "base", &base);
            let a = apply_pn(&root, "a", &ea);
            let b = apply_pn(&root, "b", &eb);
            prop_assert_eq!(a.merged(&b), b.merged(&a));
        }

        #[test]
        fn merge_is_associative(base in edits(), ea in edits(), eb in edits(), ec in edits()) {
            let root = apply_pn(&PNCounter::new(), "base", &base);
            let a = apply_pn(&root, "a", &ea);
            let b = apply_pn(&root, "b", &eb);
            let c = apply_pn(&root, "c", &ec);
            prop_assert_eq!(a.merged(&b).merged(&c), a.merged(&b.merged(&c)));
        }

        #[test]
        fn merge_is_idempotent(base in edits(), ea in edits()) {
            let root = apply_pn(&PNCounter::new(), "base", &base);
            let a = apply_pn(&root, "a", &ea);
            prop_assert_eq!(a.merged(&a), a);
        }

        /// Local increments are monotone; decrements bounded at zero.
        #[test]
        fn value_respects_bounds(ea in edits()) {
            let mut counter = PNCounter::new();
            for &(_, suffix, delta, is_inc) in &ea {
                let r = replica("a", suffix);
                let before = counter.value();
                counter = if is_inc {
                    counter.increment(&r, delta)
                } else {
                    counter.decrement(&r, delta)
                };
                if is_inc {
                    prop_assert!(counter.value() >= before);
                } else {
                    prop_assert!(counter.value() <= before);
                }
            }
        }
    }
}

mod list_crdt_properties {
    use super::*;

    proptest! {
        #[test]
        fn merge_is_commutative(base in edits(), ea in edits(), eb in edits()) {
            let root = apply(&ShoppingListCrdt::new(), "base", &base);
            let a = apply(&root, "a", &ea);
            let b = apply(&root, "b", &eb);
            prop_assert_eq!(a.merged(&b), b.merged(&a));
        }

        #[test]
        fn merge_is_associative(base in edits(), ea in edits(), eb in edits(), ec in edits()) {
            let root = apply(&ShoppingListCrdt::new(), "base", &base);
            let a = apply(&root, "a", &ea);
            let b = apply(&root, "b", &eb);
            let c = apply(&root, "c", &ec);
            prop_assert_eq!(a.merged(&b).merged(&c), a.merged(&b.merged(&c)));
        }

        #[test]
        fn merge_is_idempotent(base in edits(), ea in edits()) {
            let root = apply(&ShoppingListCrdt::new(), "base", &base);
            let a = apply(&root, "a", &ea);
            prop_assert_eq!(a.merged(&a), a.clone());
        }

        /// Merge never shrinks a fork's own additions below what the other
        /// fork has observed: per-item value of the merge is at least the
        /// value either side could justify alone minus the other's removals
        /// it already saw. Weak but execution-independent form: merging with
        /// a fork of yourself never loses your grow-side state.
        #[test]
        fn merge_with_descendant_is_descendant(base in edits(), ea in edits()) {
            let root = apply(&ShoppingListCrdt::new(), "base", &base);
            let descendant = apply(&root, "a", &ea);
            prop_assert_eq!(root.merged(&descendant), descendant.clone());
            prop_assert_eq!(descendant.merged(&root), descendant);
        }

        /// Full pairwise sync converges all replicas to the same state.
        #[test]
        fn replicas_converge(base in edits(), ea in edits(), eb in edits(), ec in edits()) {
            let root = apply(&ShoppingListCrdt::new(), "base", &base);
            let a = apply(&root, "a", &ea);
            let b = apply(&root, "b", &eb);
            let c = apply(&root, "c", &ec);

            // Every replica merges the others' snapshots, in different orders.
            let at_a = a.merged(&b).merged(&c);
            let at_b = b.merged(&c).merged(&a);
            let at_c = c.merged(&a).merged(&b);

            prop_assert_eq!(at_a.clone(), at_b);
            prop_assert_eq!(at_a, at_c);
        }

        /// Canonical encoding: equal states encode to identical bytes.
        #[test]
        fn equal_states_encode_identically(base in edits(), ea in edits(), eb in edits()) {
            let root = apply(&ShoppingListCrdt::new(), "base", &base);
            let a = apply(&root, "a", &ea);
            let b = apply(&root, "b", &eb);
            let ab = a.merged(&b);
            let ba = b.merged(&a);
            prop_assert_eq!(
                serde_json::to_string(&ab).unwrap(),
                serde_json::to_string(&ba).unwrap()
            );
        }

        /// JSON round-trips losslessly through the wire encoding.
        #[test]
        fn serialization_roundtrip(base in edits(), ea in edits()) {
            let root = apply(&ShoppingListCrdt::new(), "base", &base);
            let a = apply(&root, "a", &ea);
            let json = serde_json::to_string(&a).unwrap();
            let parsed: ShoppingListCrdt = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(a, parsed);
        }
    }
}
