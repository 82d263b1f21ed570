//! context-extensions: per-context extension state with a process-wide
//! registry and lock-free repeat lookups.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: let independent extension modules attach state to long-lived,
//!   externally-owned contexts, and find that state again from a bare
//!   context handle cheaply.
//! - Layers:
//!   - SlotAllocator / KeySpace / ExtensionKey<T>: each extension module
//!     registers one key and gets a dense slot index, reused after the key
//!     is dropped.
//!   - ExtensionBlock: one context's extension objects, one optional entry
//!     per slot, sized at construction and never grown.
//!   - ContextMap<V>: handle-keyed map with generational entry ids.
//!   - ContextRegistry: mutex-protected ContextMap of blocks plus the arena
//!     of per-thread cache lines; `ExtensionState` owns a registration.
//!   - cache: per-thread (handle, block) memo consulted before the lock.
//!
//! Constraints
//! - Lookups of the context a thread used last take no lock.
//! - Insert, remove and cache (de)registration share one mutex per
//!   registry and are totally ordered.
//! - Removing a context clears every thread's cache line holding its
//!   handle, so a new context at the same address is never confused with
//!   the old one.
//! - No extension code (factories, extension `Drop`) runs under the lock.
//!
//! Contract
//! - A context is not looked up concurrently with its own destruction
//!   from another unsynchronized thread. Breaking this is memory-safe but
//!   may return the outgoing block.
//! - Creating state twice for one live handle and looking up a handle
//!   without state are caller errors: the `try_*` entry points report
//!   them, the others panic.
//! - Blocks do not grow: a key registered after a block was built has no
//!   entry in it.
//!
//! Notes and non-goals
//! - No cross-process sharing, persistence, or migrating extension state
//!   between contexts.
//! - `KeySpace::register` scans linearly for a free slot; keys are
//!   registered at load time, not on hot paths.

mod block;
mod cache;
#[cfg(feature = "bench_internal")]
pub mod context_map;
#[cfg(not(feature = "bench_internal"))]
mod context_map;
mod context_map_proptest;
mod error;
mod handle;
mod key;
pub mod opname;
mod reentrancy;
mod registry;
mod slots;

// Public surface
pub use block::{Extension, ExtensionBlock, ExtensionFactory};
pub use error::RegistryError;
pub use handle::ContextHandle;
pub use key::{ExtensionKey, KeySpace};
pub use registry::{ContextRegistry, ExtensionState};
pub use slots::{Slot, SlotAllocator};

use core::any::Any;
use std::sync::Arc;

/// Register extension state for `handle` in the global registry.
///
/// Panics if `handle` already has extension state.
pub fn create_extension_state<'f, I>(handle: ContextHandle, factories: I) -> ExtensionState
where
    I: IntoIterator<Item = ExtensionFactory<'f>>,
{
    ContextRegistry::global().create_state(handle, factories)
}

/// Extension block of `handle` in the global registry.
///
/// Panics if `handle` has no extension state.
#[inline]
pub fn get_extension_state(handle: ContextHandle) -> Arc<ExtensionBlock> {
    ContextRegistry::global().get_state(handle)
}

/// Register an extension key in the global key space.
pub fn register_key<T: Any + Send + Sync>() -> ExtensionKey<T> {
    KeySpace::global().register()
}
