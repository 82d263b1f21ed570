//! Per-thread lookup cache.
//!
//! Normal code uses one context per thread for long stretches, so each
//! thread remembers the last (handle, block) pair it resolved against each
//! registry and serves repeated lookups without locking.
//!
//! A cache has two halves:
//! - `CacheLine`, the handle, shared with the registry. The owning thread
//!   reads it without the lock; it is only ever written under the
//!   registry lock, by the owner on a miss or by whichever thread removes
//!   that context (scrub). It is atomic so the lock-free read sees either
//!   the old handle or the cleared value, never a torn one.
//! - a `Weak` to the block, touched by the owning thread only. It does not
//!   keep extension objects alive; a block that is already gone fails to
//!   upgrade and the lookup falls back to the slow path.
//!
//! A hit takes no lock but still upgrades the `Weak` and hands out a new
//! `Arc`, so threads reading the same context all touch that block's
//! reference count.

use crate::block::ExtensionBlock;
use crate::handle::ContextHandle;
use crate::registry::RegistryShared;
use core::cell::RefCell;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

slotmap::new_key_type! {
    /// Slot of a thread's cache line in a registry's cache arena.
    pub(crate) struct CacheId;
}

const EMPTY: usize = 0;

#[derive(Debug)]
pub(crate) struct CacheLine {
    handle: AtomicUsize,
}

impl CacheLine {
    pub(crate) const fn new() -> Self {
        Self {
            handle: AtomicUsize::new(EMPTY),
        }
    }

    #[inline]
    pub(crate) fn holds(&self, handle: ContextHandle) -> bool {
        self.handle.load(Ordering::Relaxed) == handle.addr()
    }

    /// Record the last resolved handle. Registry lock must be held.
    pub(crate) fn set(&self, handle: Option<ContextHandle>) {
        let raw = handle.map_or(EMPTY, ContextHandle::addr);
        self.handle.store(raw, Ordering::Relaxed);
    }

    /// Clear the line if it holds `handle`. Registry lock must be held.
    pub(crate) fn scrub(&self, handle: ContextHandle) -> bool {
        if self.holds(handle) {
            self.handle.store(EMPTY, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

struct ThreadCache {
    registry_id: u64,
    registry: Weak<RegistryShared>,
    id: CacheId,
    line: Arc<CacheLine>,
    block: Weak<ExtensionBlock>,
}

#[derive(Default)]
struct ThreadCaches {
    caches: Vec<ThreadCache>,
}

impl ThreadCaches {
    fn lookup(
        &mut self,
        registry: &Arc<RegistryShared>,
        handle: ContextHandle,
    ) -> Option<Arc<ExtensionBlock>> {
        let cache = self.cache_for(registry);
        if cache.line.holds(handle) {
            if let Some(block) = cache.block.upgrade() {
                return Some(block);
            }
        }

        let block = registry.resolve(&cache.line, handle);
        cache.block = block.as_ref().map_or_else(Weak::new, Arc::downgrade);
        block
    }

    fn cache_for(&mut self, registry: &Arc<RegistryShared>) -> &mut ThreadCache {
        if let Some(i) = self
            .caches
            .iter()
            .position(|c| c.registry_id == registry.id)
        {
            return &mut self.caches[i];
        }

        // Forget caches of registries that no longer exist.
        self.caches.retain(|c| c.registry.strong_count() > 0);

        let line = Arc::new(CacheLine::new());
        let id = registry.register_cache(Arc::clone(&line));
        let i = self.caches.len();
        self.caches.push(ThreadCache {
            registry_id: registry.id,
            registry: Arc::downgrade(registry),
            id,
            line,
            block: Weak::new(),
        });
        &mut self.caches[i]
    }
}

impl Drop for ThreadCaches {
    fn drop(&mut self) {
        for cache in self.caches.drain(..) {
            if let Some(registry) = cache.registry.upgrade() {
                registry.deregister_cache(cache.id);
            }
        }
    }
}

thread_local! {
    static THREAD_CACHES: RefCell<ThreadCaches> = RefCell::new(ThreadCaches::default());
}

/// Resolve `handle` through the calling thread's cache for `registry`.
#[inline]
pub(crate) fn lookup(
    registry: &Arc<RegistryShared>,
    handle: ContextHandle,
) -> Option<Arc<ExtensionBlock>> {
    THREAD_CACHES
        .try_with(|caches| caches.borrow_mut().lookup(registry, handle))
        .unwrap_or_else(|_| registry.resolve_uncached(handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeySpace;
    use crate::registry::ContextRegistry;
    use std::sync::mpsc;

    fn h(addr: usize) -> ContextHandle {
        ContextHandle::from_addr(addr).unwrap()
    }

    #[test]
    fn line_set_holds_scrub() {
        let line = CacheLine::new();
        assert!(!line.holds(h(8)));
        line.set(Some(h(8)));
        assert!(line.holds(h(8)));
        assert!(!line.scrub(h(16)));
        assert!(line.holds(h(8)));
        assert!(line.scrub(h(8)));
        assert!(!line.holds(h(8)));
        line.set(Some(h(8)));
        line.set(None);
        assert!(!line.holds(h(8)));
    }

    /// Invariant: the first lookup registers one cache for this thread;
    /// further lookups, hits or misses, reuse it.
    #[test]
    fn one_cache_per_thread_and_registry() {
        let registry = ContextRegistry::new();
        let keys = KeySpace::new();
        let k = keys.register::<u32>();
        let _a = registry.create_state(h(0x100), [k.factory(|_| 1u32)]);
        let _b = registry.create_state(h(0x200), [k.factory(|_| 2u32)]);
        assert_eq!(registry.cache_count(), 0);

        for _ in 0..3 {
            assert_eq!(registry.get_state(h(0x100)).get(&k), Some(&1));
            assert_eq!(registry.get_state(h(0x200)).get(&k), Some(&2));
        }
        assert_eq!(registry.cache_count(), 1);
    }

    /// Invariant: a cached entry never outlives the block it points to; once
    /// the state is gone the handle misses even on the owning thread.
    #[test]
    fn cached_handle_misses_after_destroy() {
        let registry = ContextRegistry::new();
        let state = registry.create_state(h(0x300), Vec::new());
        let first = registry.get_state(h(0x300));
        assert!(Arc::ptr_eq(&first, state.block()));
        drop(first);
        drop(state);
        assert!(registry.try_get_state(h(0x300)).is_err());

        let again = registry.create_state(h(0x300), Vec::new());
        assert!(Arc::ptr_eq(&registry.get_state(h(0x300)), again.block()));
    }

    /// Invariant: the cache does not keep a destroyed block's extensions alive.
    #[test]
    fn cache_holds_no_strong_reference() {
        let registry = ContextRegistry::new();
        let state = registry.create_state(h(0x400), Vec::new());
        let weak = Arc::downgrade(state.block());
        drop(registry.get_state(h(0x400)));
        drop(state);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn thread_exit_deregisters_cache() {
        let registry = ContextRegistry::new();
        let _state = registry.create_state(h(0x500), Vec::new());
        let r = registry.clone();
        std::thread::spawn(move || {
            let _ = r.get_state(h(0x500));
            assert_eq!(r.cache_count(), 1);
        })
        .join()
        .unwrap();
        assert_eq!(registry.cache_count(), 0);
    }

    struct LookupAtExit {
        registry: ContextRegistry,
        handle: ContextHandle,
        found: mpsc::Sender<Option<Arc<ExtensionBlock>>>,
    }

    impl Drop for LookupAtExit {
        fn drop(&mut self) {
            let _ = self.found.send(self.registry.try_get_state(self.handle).ok());
        }
    }

    thread_local! {
        static AT_EXIT: RefCell<Option<LookupAtExit>> = const { RefCell::new(None) };
    }

    /// Invariant: lookups made while a thread's locals are being torn down
    /// still resolve, and leave no cache registered once the thread is gone.
    #[test]
    fn lookup_during_thread_teardown() {
        let registry = ContextRegistry::new();
        let state = registry.create_state(h(0x600), Vec::new());
        let (tx, rx) = mpsc::channel();

        let r = registry.clone();
        std::thread::spawn(move || {
            AT_EXIT.with(|slot| {
                *slot.borrow_mut() = Some(LookupAtExit {
                    registry: r.clone(),
                    handle: h(0x600),
                    found: tx,
                })
            });
            // The thread cache is created after AT_EXIT, so it is torn down first.
            drop(r.get_state(h(0x600)));
        })
        .join()
        .unwrap();

        let found = rx.recv().unwrap().expect("lookup at thread exit failed");
        assert!(Arc::ptr_eq(&found, state.block()));
        assert_eq!(registry.cache_count(), 0);
    }
}
