//! Property-based tests checking the index against a `BTreeMap`
//! reference model, plus the literal end-to-end scenarios.

use std::collections::BTreeMap;

use proptest::prelude::*;
use wormhole::{Wormhole, WormholeForLongKey};

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>, i32),
    Delete(Vec<u8>),
    Get(Vec<u8>),
}

fn short_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..=5u8, 1..4)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (short_key(), any::<i32>()).prop_map(|(k, v)| Op::Put(k, v)),
        short_key().prop_map(Op::Delete),
        short_key().prop_map(Op::Get),
    ]
}

proptest! {
    /// P1: `get` after any sequence of `put`/`delete` agrees with a
    /// `BTreeMap` reference model.
    #[test]
    fn get_matches_reference_map(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let mut wh: Wormhole<i32> = Wormhole::new(8, true);
        let mut reference: BTreeMap<Vec<u8>, i32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    wh.put(k.clone(), v);
                    reference.insert(k, v);
                }
                Op::Delete(k) => {
                    let wh_had = wh.delete(&k);
                    let ref_had = reference.remove(&k).is_some();
                    prop_assert_eq!(wh_had, ref_had);
                }
                Op::Get(k) => {
                    prop_assert_eq!(wh.get(&k), reference.get(&k).copied());
                }
            }
        }

        for (k, v) in &reference {
            prop_assert_eq!(wh.get(k), Some(*v));
        }
    }

    /// P6/P7: full scans return every key present in the reference
    /// model, in ascending order, regardless of insertion order.
    #[test]
    fn scan_yields_sorted_keys_matching_reference(
        keys in prop::collection::hash_set(short_key(), 1..100)
    ) {
        let mut wh: Wormhole<i32> = Wormhole::new(8, true);
        let mut reference: BTreeMap<Vec<u8>, i32> = BTreeMap::new();

        for (i, k) in keys.into_iter().enumerate() {
            wh.put(k.clone(), i as i32);
            reference.insert(k, i as i32);
        }

        let mut scanned = Vec::new();
        wh.scan(None, None, false, |e| {
            scanned.push(e.key.clone());
            true
        });

        let expected: Vec<Vec<u8>> = reference.keys().cloned().collect();
        prop_assert_eq!(scanned, expected);
    }

    /// P10: `put` is idempotent — putting the same key/value pair twice
    /// leaves the index in the same observable state as putting it once.
    #[test]
    fn put_is_idempotent(key in short_key(), value in any::<i32>()) {
        let mut wh: Wormhole<i32> = Wormhole::new(8, true);
        wh.put(key.clone(), value);
        let after_first = wh.get(&key);
        wh.put(key.clone(), value);
        let after_second = wh.get(&key);
        prop_assert_eq!(after_first, after_second);
        prop_assert_eq!(after_second, Some(value));
    }

    /// P11: deleting a key that was never inserted is a no-op that
    /// reports absence, and deleting right after inserting is its
    /// exact inverse.
    #[test]
    fn delete_is_put_inverse(key in short_key(), value in any::<i32>()) {
        let mut wh: Wormhole<i32> = Wormhole::new(8, true);
        prop_assert!(!wh.delete(&key));

        wh.put(key.clone(), value);
        prop_assert!(wh.delete(&key));
        prop_assert_eq!(wh.get(&key), None);
        prop_assert!(!wh.delete(&key));
    }
}

#[test]
fn scenario_3_integer_keys_bounded_scan_excludes_the_large_outlier() {
    let mut wh: WormholeForLongKey<i32> = WormholeForLongKey::new(8, true);
    for k in [100i64, -5, 1i64 << 62, 0] {
        wh.put(k, k as i32);
    }
    let mut seen = Vec::new();
    wh.scan(Some(-1), Some(101), true, |k, v| {
        seen.push((k, *v));
        true
    });
    assert_eq!(seen, vec![(0, 0), (100, 100)]);
}

#[test]
fn scenario_3_dense_numeric_keys_force_repeated_splits() {
    let mut wh: Wormhole<i32> = Wormhole::new(4, true);
    for i in 0..200i32 {
        wh.put(format!("{:05}", i).into_bytes(), i);
    }
    for i in 0..200i32 {
        assert_eq!(wh.get(format!("{:05}", i).into_bytes().as_slice()), Some(i));
    }
    assert_eq!(wh.scan_with_count(b"00000", 200).len(), 200);
}

#[test]
fn scenario_6_interleaved_put_delete_converges_to_reference() {
    let mut wh: Wormhole<i32> = Wormhole::new(6, true);
    let mut reference: BTreeMap<Vec<u8>, i32> = BTreeMap::new();

    for round in 0..50i32 {
        let key = format!("key-{:03}", round % 20).into_bytes();
        if round % 3 == 0 && reference.contains_key(&key) {
            wh.delete(&key);
            reference.remove(&key);
        } else {
            wh.put(key.clone(), round);
            reference.insert(key, round);
        }
    }

    for (k, v) in &reference {
        assert_eq!(wh.get(k), Some(*v));
    }
    let mut scanned = Vec::new();
    wh.scan(None, None, false, |e| {
        scanned.push(e.key.clone());
        true
    });
    assert_eq!(scanned, reference.keys().cloned().collect::<Vec<_>>());
}
