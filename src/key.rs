//! Extension keys and the key spaces that hand out their slots.
//!
//! Each extension module registers one key, typically at load time, and
//! drops it at unload time. The key's slot is the module's private index
//! into every extension block; dropping the key frees the slot for the
//! next registration.

use crate::block::{Extension, ExtensionFactory};
use crate::handle::ContextHandle;
use crate::slots::{Slot, SlotAllocator};
use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};

/// A namespace of slots shared by a set of extension keys.
///
/// Cloning yields another handle to the same space.
#[derive(Clone, Default)]
pub struct KeySpace {
    slots: Arc<Mutex<SlotAllocator>>,
}

impl KeySpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide key space, created on first use.
    pub fn global() -> &'static KeySpace {
        static GLOBAL: OnceLock<KeySpace> = OnceLock::new();
        GLOBAL.get_or_init(KeySpace::new)
    }

    /// Reserve a slot for extensions of type `T`.
    pub fn register<T: Any + Send + Sync>(&self) -> ExtensionKey<T> {
        let slot = self.slots.lock().acquire();
        tracing::debug!(slot, extension = core::any::type_name::<T>(), "registered extension key");
        ExtensionKey {
            slot,
            space: self.clone(),
            _ty: PhantomData,
        }
    }

    /// Number of keys currently registered.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Slot count a block needs to hold every currently registered key.
    pub fn high_water(&self) -> usize {
        self.slots.lock().high_water()
    }

    pub fn is_registered(&self, slot: Slot) -> bool {
        self.slots.lock().is_occupied(slot)
    }

    /// Snapshot of the registered slots in ascending order.
    pub fn registered(&self) -> Vec<Slot> {
        self.slots.lock().occupied().collect()
    }

    fn release(&self, slot: Slot) {
        self.slots.lock().release(slot);
        tracing::debug!(slot, "released extension key");
    }
}

impl fmt::Debug for KeySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySpace")
            .field("registered", &self.registered())
            .finish()
    }
}

/// Registration token of one extension module; owns slot `slot()` in
/// its key space until dropped.
pub struct ExtensionKey<T> {
    slot: Slot,
    space: KeySpace,
    _ty: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> ExtensionKey<T> {
    #[inline]
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Factory installing the output of `make` into this key's slot of a
    /// new extension block.
    pub fn factory<'f, F>(&self, make: F) -> ExtensionFactory<'f>
    where
        F: FnOnce(ContextHandle) -> T + 'f,
    {
        ExtensionFactory::new(self.slot, move |handle| Box::new(make(handle)) as Extension)
    }

    /// Whether this key belongs to `space`.
    pub fn is_in(&self, space: &KeySpace) -> bool {
        Arc::ptr_eq(&self.space.slots, &space.slots)
    }
}

impl<T> Drop for ExtensionKey<T> {
    fn drop(&mut self) {
        self.space.release(self.slot);
    }
}

impl<T> fmt::Debug for ExtensionKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionKey")
            .field("slot", &self.slot)
            .field("extension", &core::any::type_name::<T>())
            .finish()
    }
}
