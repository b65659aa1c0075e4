#![cfg(test)]

// Property tests for SlotTable, kept inside the crate because the table is
// not part of the public surface.

use crate::table::{Handle, SlotTable};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Pool-indexed so that shrinking moves toward earlier keys.
#[derive(Clone, Debug)]
enum Op {
    Replace(usize, i32),
    Remove(usize),
    RemoveStale(usize),
    Find(usize),
    Contains(String),
    Retain(i32),
    Clear,
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<Op>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| Op::Replace(i, v)),
            2 => idx.clone().prop_map(Op::Remove),
            2 => any::<usize>().prop_map(Op::RemoveStale),
            2 => idx.clone().prop_map(Op::Find),
            1 => prop_oneof![contains_pool, "[a-z]{0,4}"].prop_map(Op::Contains),
            1 => (2..5i32).prop_map(Op::Retain),
            1 => Just(Op::Clear),
            1 => Just(Op::Iterate),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Drives `sut` and a std HashMap model through the same operations.
//
// Checked after every step:
// - every superseded or removed handle stays stale, even after slot reuse;
// - live handles resolve to the model's key and value;
// - `len`/`is_empty` agree with the model.
fn run_scenario<S: BuildHasher>(
    mut sut: SlotTable<Key, i32, S>,
    pool: Vec<String>,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut live: HashMap<Key, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            Op::Replace(i, v) => {
                let k = key_from(&pool, i);
                let (h, old) = sut.replace(k.clone(), v);
                match (old, model.insert(k.clone(), v)) {
                    (Some((old_h, old_k, old_v)), Some(mv)) => {
                        prop_assert_eq!(old_k, k.clone());
                        prop_assert_eq!(old_v, mv);
                        prop_assert_eq!(Some(old_h), live.get(&k).copied());
                        prop_assert_ne!(old_h, h, "replace must install a fresh handle");
                        stale.push(old_h);
                    }
                    (None, None) => {}
                    (s, m) => prop_assert!(false, "replace disagrees: {:?} vs {:?}", s, m),
                }
                live.insert(k, h);
            }
            Op::Remove(i) => {
                let k = key_from(&pool, i);
                match live.remove(&k) {
                    Some(h) => {
                        let (kk, vv) = sut.remove(h).expect("live handle removes");
                        prop_assert_eq!(&kk, &k);
                        prop_assert_eq!(Some(vv), model.remove(&k));
                        stale.push(h);
                    }
                    None => prop_assert!(sut.find(&k).is_none()),
                }
            }
            Op::RemoveStale(i) => {
                if !stale.is_empty() {
                    let h = stale[i % stale.len()];
                    prop_assert!(sut.remove(h).is_none(), "stale handle must not remove");
                }
            }
            Op::Find(i) => {
                let k = key_from(&pool, i);
                prop_assert_eq!(sut.find(&k), live.get(&k).copied());
            }
            Op::Contains(s) => {
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(sut.contains_key(s.as_str()), has_model);
            }
            Op::Retain(m) => {
                let removed = sut.extract_if(|_, _, v| v % m == 0);
                for (h, k, v) in removed {
                    prop_assert_eq!(model.remove(&k), Some(v));
                    prop_assert_eq!(live.remove(&k), Some(h));
                    stale.push(h);
                }
                prop_assert!(model.values().all(|v| v % m != 0));
            }
            Op::Clear => {
                let drained: BTreeSet<Key> = sut.clear().into_iter().map(|(k, _)| k).collect();
                let expected: BTreeSet<Key> = model.drain().map(|(k, _)| k).collect();
                prop_assert_eq!(drained, expected);
                stale.extend(live.drain().map(|(_, h)| h));
            }
            Op::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(_, k, _)| k.clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
                prop_assert_eq!(sut.handles().len(), model.len());
            }
        }

        for &h in &stale {
            prop_assert!(sut.value(h).is_none());
            prop_assert!(sut.key(h).is_none());
        }
        for (k, &h) in &live {
            prop_assert_eq!(sut.key(h), Some(k));
            prop_assert_eq!(sut.value(h), model.get(k));
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

#[derive(Clone, Default)]
struct ConstBuildHasher;
struct ConstHasher;
impl BuildHasher for ConstBuildHasher {
    type Hasher = ConstHasher;
    fn build_hasher(&self) -> Self::Hasher {
        ConstHasher
    }
}
impl Hasher for ConstHasher {
    fn write(&mut self, _bytes: &[u8]) {}
    fn finish(&self) -> u64 {
        0
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    // Property: SlotTable behaves like a HashMap whose overwrites retire the
    // previous handle.
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(SlotTable::new(), pool, ops)?;
    }

    // Property: the same holds when every key hashes to the same bucket.
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_scenario(SlotTable::with_capacity_and_hasher(0, ConstBuildHasher), pool, ops)?;
    }
}
