use context_extensions::{ContextHandle, ContextRegistry, ExtensionState, KeySpace, RegistryError};
use proptest::prelude::*;
use std::collections::HashMap;

// Model create/destroy/get on one thread over a small address pool, so the
// thread cache keeps switching handles and freed addresses get reused.
// Each created block records a generation; lookups must see the latest.
proptest! {
    #[test]
    fn prop_registry_tracks_latest_generation(
        pool in 1usize..=6,
        ops in proptest::collection::vec((0u8..=2u8, 0usize..64usize), 1..150),
    ) {
        let registry = ContextRegistry::new();
        let keys = KeySpace::new();
        let generation = keys.register::<u64>();
        let mut live: HashMap<usize, (u64, ExtensionState)> = HashMap::new();
        let mut next_gen = 0u64;

        for (op, raw) in ops {
            let slot = raw % pool;
            let handle = ContextHandle::from_addr(0x8000 + slot * 16).unwrap();
            match op {
                // Create
                0 => {
                    let g = next_gen;
                    let res = registry.try_create_state(handle, [generation.factory(move |_| g)]);
                    match res {
                        Ok(state) => {
                            prop_assert!(!live.contains_key(&slot));
                            live.insert(slot, (g, state));
                            next_gen += 1;
                        }
                        Err(RegistryError::DuplicateContext(hh)) => {
                            prop_assert_eq!(hh, handle);
                            prop_assert!(live.contains_key(&slot));
                        }
                        Err(other) => prop_assert!(false, "unexpected error {other}"),
                    }
                }
                // Destroy
                1 => {
                    if let Some((_, state)) = live.remove(&slot) {
                        state.destroy();
                    }
                }
                // Get
                2 => {
                    match (registry.try_get_state(handle), live.get(&slot)) {
                        (Ok(block), Some((g, state))) => {
                            prop_assert_eq!(block.get(&generation), Some(g));
                            prop_assert!(std::sync::Arc::ptr_eq(&block, state.block()));
                        }
                        (Err(RegistryError::UnregisteredContext(hh)), None) => {
                            prop_assert_eq!(hh, handle);
                        }
                        (res, model) => {
                            prop_assert!(false, "registry {:?} disagrees with model {:?}", res.map(|b| b.handle()), model.map(|m| m.0));
                        }
                    }
                }
                _ => unreachable!(),
            }

            prop_assert_eq!(registry.len(), live.len());
        }

        drop(live);
        prop_assert!(registry.is_empty());
    }
}
