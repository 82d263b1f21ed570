#![cfg(test)]

// Property tests for ContextMap kept inside the crate so they do not
// require feature gates to access internal modules.

use crate::context_map::{ContextMap, EntryId, InsertError};
use crate::handle::ContextHandle;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::hash::{BuildHasher, Hasher};

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, i32),
    Remove(usize),
    Find(usize),
    Iterate,
}

// A small address pool so inserts collide with live entries and removed
// addresses get reused, the way freed contexts are.
fn handle_from(i: usize) -> ContextHandle {
    ContextHandle::from_addr(0x1000 + (i % 12) * 0x40).unwrap()
}

prop_compose! {
    fn arb_ops()(ops in proptest::collection::vec(
        prop_oneof![
            (any::<usize>(), any::<i32>()).prop_map(|(i, v)| Op::Insert(i, v)),
            any::<usize>().prop_map(Op::Remove),
            any::<usize>().prop_map(Op::Find),
            Just(Op::Iterate),
        ], 1..120)) -> Vec<Op> { ops }
}

fn run_state_machine<S: BuildHasher>(
    mut sut: ContextMap<i32, S>,
    ops: Vec<Op>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<ContextHandle, i32> = HashMap::new();
    let mut live: HashMap<ContextHandle, EntryId> = HashMap::new();
    let mut stale: Vec<EntryId> = Vec::new();

    for op in ops {
        match op {
            Op::Insert(i, v) => {
                let handle = handle_from(i);
                let already = model.contains_key(&handle);
                match sut.insert(handle, v) {
                    Ok(id) => {
                        prop_assert!(!already, "insert must fail on duplicate");
                        prop_assert!(live.insert(handle, id).is_none());
                        model.insert(handle, v);
                    }
                    Err(InsertError::DuplicateKey(back)) => {
                        prop_assert!(already, "duplicate error only when handle exists");
                        prop_assert_eq!(back, v, "rejected value is returned intact");
                    }
                }
            }
            Op::Remove(i) => {
                let handle = handle_from(i);
                if let Some(id) = live.remove(&handle) {
                    let (hh, vv) = sut.remove(id).expect("live id removes");
                    prop_assert_eq!(hh, handle);
                    prop_assert_eq!(Some(vv), model.remove(&handle));
                    stale.push(id);
                } else {
                    prop_assert!(sut.find(handle).is_none());
                }
            }
            Op::Find(i) => {
                let handle = handle_from(i);
                let found = sut.find(handle);
                prop_assert_eq!(found, live.get(&handle).copied());
                prop_assert_eq!(sut.get(handle), model.get(&handle));
            }
            Op::Iterate => {
                let s: BTreeSet<_> = sut.iter().map(|(_, h, v)| (h, *v)).collect();
                let m: BTreeSet<_> = model.iter().map(|(h, v)| (*h, *v)).collect();
                prop_assert_eq!(s, m);
            }
        }

        for &id in &stale {
            prop_assert!(sut.entry(id).is_none(), "stale ids never resolve");
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

// State machine harness over ContextMap against a std HashMap model.
proptest! {
    #[test]
    fn prop_state_machine(ops in arb_ops()) {
        run_state_machine(ContextMap::<i32>::new(), ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
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
    #[test]
    fn prop_state_machine_with_collisions(ops in arb_ops()) {
        run_state_machine(ContextMap::with_hasher(ConstBuildHasher), ops)?;
    }
}
