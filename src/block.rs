//! ExtensionBlock: the per-context array of extension objects.

use crate::handle::ContextHandle;
use crate::key::ExtensionKey;
use crate::slots::Slot;
use core::any::Any;
use core::fmt;

/// An installed extension object.
pub type Extension = Box<dyn Any + Send + Sync>;

/// Produces one slot's extension object for a new context.
pub struct ExtensionFactory<'f> {
    slot: Slot,
    make: Box<dyn FnOnce(ContextHandle) -> Extension + 'f>,
}

impl<'f> ExtensionFactory<'f> {
    /// Untyped factory for `slot`. Slots only come from `ExtensionKey`,
    /// so outside callers build factories with `ExtensionKey::factory`.
    pub(crate) fn new<F>(slot: Slot, make: F) -> Self
    where
        F: FnOnce(ContextHandle) -> Extension + 'f,
    {
        Self {
            slot,
            make: Box::new(make),
        }
    }

    #[inline]
    pub fn slot(&self) -> Slot {
        self.slot
    }
}

impl fmt::Debug for ExtensionFactory<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionFactory")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

/// Extension objects of one context, one optional entry per slot.
///
/// The slot array is sized once, to the highest slot supplied at
/// construction plus one. Keys registered afterwards have no entry here
/// and `get` reports them as not installed; blocks never grow.
pub struct ExtensionBlock {
    handle: ContextHandle,
    slots: Box<[Option<Extension>]>,
}

impl ExtensionBlock {
    /// Run `factories` for `handle` and collect their objects.
    ///
    /// A slot supplied twice keeps the later object.
    pub(crate) fn make<'f, I>(handle: ContextHandle, factories: I) -> Self
    where
        I: IntoIterator<Item = ExtensionFactory<'f>>,
    {
        let factories: Vec<ExtensionFactory<'f>> = factories.into_iter().collect();
        let slot_count = factories
            .iter()
            .map(|f| {
                f.slot
                    .checked_add(1)
                    .unwrap_or_else(|| panic!("extension slot {} is out of range", f.slot))
            })
            .max()
            .unwrap_or(0);

        let mut slots: Box<[Option<Extension>]> = (0..slot_count).map(|_| None).collect();
        for factory in factories {
            let ext = (factory.make)(handle);
            if slots[factory.slot].replace(ext).is_some() {
                tracing::debug!(%handle, slot = factory.slot, "extension slot supplied twice, keeping the later object");
            }
        }

        Self { handle, slots }
    }

    /// The context this block was built for.
    #[inline]
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    /// Capacity of the slot array.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Extension installed for `key`, if any.
    #[inline]
    pub fn get<T: Any + Send + Sync>(&self, key: &ExtensionKey<T>) -> Option<&T> {
        self.get_slot(key.slot())?.downcast_ref::<T>()
    }

    /// Untyped access to a slot; `None` when empty or out of range.
    #[inline]
    pub fn get_slot(&self, slot: Slot) -> Option<&(dyn Any + Send + Sync)> {
        self.slots.get(slot)?.as_deref()
    }

    pub fn is_installed(&self, slot: Slot) -> bool {
        self.get_slot(slot).is_some()
    }

    /// Occupied slots in ascending order.
    pub fn installed(&self) -> impl Iterator<Item = Slot> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, ext)| ext.is_some().then_some(slot))
    }
}

impl fmt::Debug for ExtensionBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionBlock")
            .field("handle", &self.handle)
            .field("slot_count", &self.slot_count())
            .field("installed", &self.installed().collect::<Vec<_>>())
            .finish()
    }
}
