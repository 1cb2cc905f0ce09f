//! Property-based tests that MUST pass for every field CRDT.
//!
//! Merging the same set of deltas in any order must produce the same field
//! state, and the codec must be deterministic:
//!  - Order independence: fold(permutation(ds)) = fold(ds), float counters included
//!  - Survivor selection is commutative and idempotent
//!  - Identical deltas always hash identically

use proptest::prelude::*;
use std::collections::BTreeMap;
use tessera_core::codec::{self, AnySchema};
use tessera_core::lattice::fold;
use tessera_core::{
    ContentHash, DeltaBuilder, DeltaTarget, DocumentId, FieldKind, FieldUpdate, FieldValue, LwwRegister, Priority,
};

fn priority_strategy() -> impl Strategy<Value = Priority> {
    (1u64..6, prop::array::uniform32(any::<u8>())).prop_map(|(height, bytes)| Priority::new(height, ContentHash::from_bytes(bytes)))
}

fn updates_strategy() -> impl Strategy<Value = Vec<(i64, Priority)>> {
    prop::collection::vec((-1000i64..1000, priority_strategy()), 1..12)
}

fn merge_all(kind: FieldKind, updates: &[(FieldValue, Priority)]) -> tessera_core::FieldState {
    fold(
        &kind,
        updates.iter().map(|(v, p)| FieldUpdate {
            value: v,
            priority: *p,
        }),
    )
    .unwrap()
}

// deterministic shuffle from the seed
fn shuffle<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut shuffled = items.to_vec();
    for i in (1..shuffled.len()).rev() {
        let j = (seed.wrapping_mul(i as u64 + 7) % (i as u64 + 1)) as usize;
        shuffled.swap(i, j);
    }
    shuffled
}

fn raw_sum(updates: &[(FieldValue, Priority)]) -> i64 {
    updates
        .iter()
        .map(|(v, _)| match v {
            FieldValue::Int(n) => *n,
            _ => 0,
        })
        .fold(0i64, |a, b| a.wrapping_add(b))
}

proptest! {
    #[test]
    fn lww_order_independent(raw in updates_strategy(), seed in any::<u64>()) {
        // one value per priority: equal hashes always mean equal deltas
        let unique: BTreeMap<Priority, i64> = raw.into_iter().map(|(v, p)| (p, v)).collect();
        let updates: Vec<_> = unique.into_iter().map(|(p, v)| (FieldValue::Int(v), p)).collect();
        let shuffled = shuffle(&updates, seed);

        prop_assert_eq!(merge_all(FieldKind::LwwRegister, &updates), merge_all(FieldKind::LwwRegister, &shuffled));
    }

    #[test]
    fn counter_order_independent(raw in updates_strategy()) {
        let updates: Vec<_> = raw.into_iter().map(|(v, p)| (FieldValue::Int(v), p)).collect();
        let mut reversed = updates.clone();
        reversed.reverse();

        let forward = merge_all(FieldKind::PNCounter, &updates);
        let backward = merge_all(FieldKind::PNCounter, &reversed);
        prop_assert_eq!(&forward, &backward);

        let expected: i64 = raw_sum(&updates);
        prop_assert_eq!(forward.value, FieldValue::Int(expected));
    }

    #[test]
    fn float_counter_order_independent(
        raw in prop::collection::vec((-1.0e6f64..1.0e6, priority_strategy()), 1..12),
        seed in any::<u64>(),
    ) {
        // one increment per hash: a hash is only ever merged once
        let unique: BTreeMap<ContentHash, (f64, Priority)> = raw.into_iter().map(|(v, p)| (p.hash, (v, p))).collect();
        let updates: Vec<_> = unique.into_values().map(|(v, p)| (FieldValue::Float(v), p)).collect();
        let shuffled = shuffle(&updates, seed);

        let forward = merge_all(FieldKind::PNCounter, &updates);
        let permuted = merge_all(FieldKind::PNCounter, &shuffled);
        prop_assert_eq!(&forward.value, &permuted.value);
        prop_assert_eq!(forward, permuted);
    }

    #[test]
    fn lww_survivor_is_max(a in priority_strategy(), b in priority_strategy()) {
        prop_assert_eq!(LwwRegister::survivor(a, b), LwwRegister::survivor(b, a));
        prop_assert_eq!(LwwRegister::survivor(a, a), a);
        let s = LwwRegister::survivor(a, b);
        prop_assert!(s >= a && s >= b);
    }

    #[test]
    fn encoding_is_deterministic(value in -1000i64..1000, height in 1u64..100, preds in prop::collection::vec(prop::array::uniform32(any::<u8>()), 0..4)) {
        let doc = DocumentId::derive("users", &BTreeMap::new()).unwrap();
        let build = |preds: &[[u8; 32]]| {
            DeltaBuilder::new(doc.clone(), DeltaTarget::field("age"))
                .with_height(height)
                .with_value(codec::encode_value(&FieldValue::Int(value)).unwrap())
                .with_predecessors(preds.iter().map(|b| ContentHash::from_bytes(*b)).collect())
                .with_schema_version("v1")
                .build()
        };

        let mut reversed = preds.clone();
        reversed.reverse();
        let a = codec::encode(&build(&preds)).unwrap();
        let b = codec::encode(&build(&reversed)).unwrap();
        prop_assert_eq!(&a, &b);

        let decoded = codec::decode_verified(&a.bytes, &a.hash, AnySchema).unwrap();
        prop_assert_eq!(codec::encode(&decoded).unwrap(), a);
    }
}
