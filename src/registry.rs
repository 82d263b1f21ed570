//! ContextRegistry: the authoritative context handle -> extension block map.
//!
//! One mutex guards both the map and the arena of per-thread cache lines,
//! so every insert, remove and cache (de)registration is totally ordered.
//! Lookups only take the lock on a thread-cache miss (see `cache`).
//!
//! Removal scrubs every cache line still holding the removed handle,
//! whichever thread owns it. Without that, a thread that used the context
//! earlier could keep resolving the handle to the old block after a new
//! context is created at the same address.
//!
//! Precondition: a context is not looked up concurrently with its own
//! destruction from another, unsynchronized thread. Contexts are used by
//! one thread at a time and ownership moves only through external
//! synchronization. A lookup racing with destruction stays memory-safe:
//! it may return the outgoing block, or miss and take the slow path.

use crate::block::{ExtensionBlock, ExtensionFactory};
use crate::cache::{self, CacheId, CacheLine};
use crate::context_map::{ContextMap, EntryId, InsertError};
use crate::error::RegistryError;
use crate::handle::ContextHandle;
use crate::reentrancy::{self, ReentrancyGuard};
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};
use parking_lot::{Mutex, MutexGuard};
use slotmap::SlotMap;
use std::sync::{Arc, OnceLock};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

struct RegistryState {
    contexts: ContextMap<Arc<ExtensionBlock>>,
    caches: SlotMap<CacheId, Arc<CacheLine>>,
}

pub(crate) struct RegistryShared {
    pub(crate) id: u64,
    state: Mutex<RegistryState>,
}

struct Locked<'a> {
    // Field order matters: unlock before leaving the reentrancy section.
    state: MutexGuard<'a, RegistryState>,
    _reentrancy: ReentrancyGuard,
}

impl Deref for Locked<'_> {
    type Target = RegistryState;
    fn deref(&self) -> &RegistryState {
        &self.state
    }
}

impl DerefMut for Locked<'_> {
    fn deref_mut(&mut self) -> &mut RegistryState {
        &mut self.state
    }
}

impl RegistryShared {
    fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(RegistryState {
                contexts: ContextMap::new(),
                caches: SlotMap::with_key(),
            }),
        }
    }

    fn lock(&self) -> Locked<'_> {
        let reentrancy = reentrancy::enter();
        Locked {
            state: self.state.lock(),
            _reentrancy: reentrancy,
        }
    }

    /// Register `block` for `handle`. A duplicate hands the block back so
    /// it is dropped after the lock is released.
    fn insert(
        &self,
        handle: ContextHandle,
        block: Arc<ExtensionBlock>,
    ) -> Result<EntryId, Arc<ExtensionBlock>> {
        let mut state = self.lock();
        match state.contexts.insert(handle, block) {
            Ok(entry) => Ok(entry),
            Err(InsertError::DuplicateKey(block)) => Err(block),
        }
    }

    /// Erase `entry` and scrub every cache line holding `handle`. Returns
    /// the registry's reference to the block for the caller to drop
    /// outside the lock.
    ///
    /// Panics if `entry` is stale or no longer maps `handle` to `block`.
    fn remove(
        &self,
        entry: EntryId,
        handle: ContextHandle,
        block: &Arc<ExtensionBlock>,
    ) -> Option<Arc<ExtensionBlock>> {
        let (removed, scrubbed) = {
            let mut state = self.lock();
            match state.contexts.entry(entry) {
                Some((stored_handle, stored)) => assert!(
                    stored_handle == handle && Arc::ptr_eq(stored, block),
                    "context {handle} does not own the extension block being removed"
                ),
                None => panic!("context {handle} removed twice"),
            }
            let removed = state.contexts.remove(entry).map(|(_, stored)| stored);

            let scrubbed = state
                .caches
                .values()
                .filter(|line| line.scrub(handle))
                .count();
            (removed, scrubbed)
        };
        tracing::debug!(%handle, scrubbed, "removed extension state");
        removed
    }

    pub(crate) fn register_cache(&self, line: Arc<CacheLine>) -> CacheId {
        let id = self.lock().caches.insert(line);
        tracing::trace!(registry = self.id, ?id, "registered thread cache");
        id
    }

    pub(crate) fn deregister_cache(&self, id: CacheId) {
        let removed = self.lock().caches.remove(id);
        debug_assert!(removed.is_some(), "thread cache deregistered twice");
    }

    /// Slow path: resolve `handle` under the lock and record the outcome
    /// in `line`.
    pub(crate) fn resolve(&self, line: &CacheLine, handle: ContextHandle) -> Option<Arc<ExtensionBlock>> {
        let block = {
            let state = self.lock();
            let block = state.contexts.get(handle).cloned();
            line.set(block.as_ref().map(|_| handle));
            block
        };
        tracing::trace!(%handle, found = block.is_some(), "thread cache miss");
        block
    }

    /// Lookup for threads whose cache is unavailable (TLS torn down).
    pub(crate) fn resolve_uncached(&self, handle: ContextHandle) -> Option<Arc<ExtensionBlock>> {
        self.lock().contexts.get(handle).cloned()
    }
}

/// Registry of extension state per context.
///
/// `ContextRegistry::global()` is the process-wide instance; it is built
/// on first use and never torn down. `ContextRegistry::new()` creates an
/// independent registry, each with its own per-thread caches. Clones
/// share the same registry.
#[derive(Clone)]
pub struct ContextRegistry {
    shared: Arc<RegistryShared>,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RegistryShared::new()),
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static ContextRegistry {
        static GLOBAL: OnceLock<ContextRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ContextRegistry::new)
    }

    /// Build the extension block for `handle` from `factories` and
    /// register it.
    ///
    /// Panics if `handle` already has extension state.
    pub fn create_state<'f, I>(&self, handle: ContextHandle, factories: I) -> ExtensionState
    where
        I: IntoIterator<Item = ExtensionFactory<'f>>,
    {
        self.try_create_state(handle, factories)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Fallible `create_state`. On a duplicate, any objects the factories
    /// already produced are dropped before returning.
    pub fn try_create_state<'f, I>(
        &self,
        handle: ContextHandle,
        factories: I,
    ) -> Result<ExtensionState, RegistryError>
    where
        I: IntoIterator<Item = ExtensionFactory<'f>>,
    {
        if self.contains(handle) {
            return Err(RegistryError::DuplicateContext(handle));
        }

        // Factories run outside the lock.
        let block = Arc::new(ExtensionBlock::make(handle, factories));
        let entry = match self.shared.insert(handle, Arc::clone(&block)) {
            Ok(entry) => entry,
            Err(rejected) => {
                drop(rejected);
                return Err(RegistryError::DuplicateContext(handle));
            }
        };

        tracing::debug!(%handle, slots = block.slot_count(), "created extension state");
        Ok(ExtensionState {
            registry: self.clone(),
            entry,
            block,
        })
    }

    /// Extension block of `handle`, served from the calling thread's
    /// cache when it last resolved the same handle.
    ///
    /// Panics if `handle` has no extension state.
    #[inline]
    pub fn get_state(&self, handle: ContextHandle) -> Arc<ExtensionBlock> {
        self.try_get_state(handle)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    #[inline]
    pub fn try_get_state(&self, handle: ContextHandle) -> Result<Arc<ExtensionBlock>, RegistryError> {
        cache::lookup(&self.shared, handle).ok_or(RegistryError::UnregisteredContext(handle))
    }

    /// Whether `handle` currently has extension state. Always takes the lock.
    pub fn contains(&self, handle: ContextHandle) -> bool {
        self.shared.lock().contexts.contains(handle)
    }

    /// Number of contexts with extension state.
    pub fn len(&self) -> usize {
        self.shared.lock().contexts.len()
    }
    pub fn is_empty(&self) -> bool {
        self.shared.lock().contexts.is_empty()
    }

    /// Number of live per-thread caches attached to this registry.
    pub fn cache_count(&self) -> usize {
        self.shared.lock().caches.len()
    }

    /// Handles that currently have extension state, in no particular order.
    pub fn handles(&self) -> Vec<ContextHandle> {
        self.shared
            .lock()
            .contexts
            .iter()
            .map(|(_, handle, _)| handle)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<RegistryShared> {
        &self.shared
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ContextRegistry")
            .field("id", &self.shared.id)
            .field("contexts", &state.contexts.len())
            .field("caches", &state.caches.len())
            .finish()
    }
}

/// Owner of one context's extension state.
///
/// Dropping it (or calling `destroy`) unregisters the context, scrubs
/// stale thread caches, and then releases the block. The extension
/// objects are dropped once no `Arc` returned by `get_state` is still
/// held.
pub struct ExtensionState {
    registry: ContextRegistry,
    entry: EntryId,
    block: Arc<ExtensionBlock>,
}

impl ExtensionState {
    #[inline]
    pub fn handle(&self) -> ContextHandle {
        self.block.handle()
    }

    #[inline]
    pub fn block(&self) -> &Arc<ExtensionBlock> {
        &self.block
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Tear down the extension state now.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Deref for ExtensionState {
    type Target = ExtensionBlock;
    fn deref(&self) -> &ExtensionBlock {
        &self.block
    }
}

impl Drop for ExtensionState {
    fn drop(&mut self) {
        let handle = self.block.handle();
        // Unregister before the slots are torn down.
        let removed = self.registry.shared.remove(self.entry, handle, &self.block);
        drop(removed);
    }
}

impl fmt::Debug for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionState")
            .field("entry", &self.entry)
            .field("block", &self.block)
            .finish()
    }
}
