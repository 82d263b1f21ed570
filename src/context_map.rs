//! ContextMap: context handle -> value map with stable, generational entry ids.
//!
//! Storage lives in a `SlotMap`; a `HashTable` indexes it by handle. The
//! entry id returned by `insert` lets the owner of an entry remove it
//! without re-hashing, and a stale id (entry already removed, slot reused
//! by a later context) never resolves.

use crate::handle::ContextHandle;
use core::hash::BuildHasher;
use hashbrown::HashTable;
use slotmap::SlotMap;
use std::collections::hash_map::RandomState;

slotmap::new_key_type! {
    /// Stable id of one registration in a `ContextMap`.
    pub struct EntryId;
}

#[derive(Debug)]
struct Entry<V> {
    handle: ContextHandle,
    value: V,
    hash: u64,
}

/// Insert found the handle already present; the rejected value is
/// handed back so the caller decides where it gets dropped.
#[derive(Debug)]
pub enum InsertError<V> {
    DuplicateKey(V),
}

pub struct ContextMap<V, S = RandomState> {
    hasher: S,
    index: HashTable<EntryId>,
    slots: SlotMap<EntryId, Entry<V>>,
}

impl<V> ContextMap<V> {
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }
}

impl<V> Default for ContextMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over live entries in `ContextMap`.
pub struct Iter<'a, V> {
    it: slotmap::basic::Iter<'a, EntryId, Entry<V>>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (EntryId, ContextHandle, &'a V);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|(id, e)| (id, e.handle, &e.value))
    }
}

impl<V, S> ContextMap<V, S>
where
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            hasher,
            index: HashTable::new(),
            slots: SlotMap::with_key(),
        }
    }

    fn make_hash(&self, handle: ContextHandle) -> u64 {
        self.hasher.hash_one(handle)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn find(&self, handle: ContextHandle) -> Option<EntryId> {
        let hash = self.make_hash(handle);
        self.index
            .find(hash, |&id| {
                self.slots
                    .get(id)
                    .map(|e| e.handle == handle)
                    .unwrap_or(false)
            })
            .copied()
    }

    pub fn contains(&self, handle: ContextHandle) -> bool {
        self.find(handle).is_some()
    }

    pub fn get(&self, handle: ContextHandle) -> Option<&V> {
        let id = self.find(handle)?;
        self.slots.get(id).map(|e| &e.value)
    }

    pub fn insert(&mut self, handle: ContextHandle, value: V) -> Result<EntryId, InsertError<V>> {
        let hash = self.make_hash(handle);
        match self.index.entry(
            hash,
            |&id| {
                self.slots
                    .get(id)
                    .map(|e| e.handle == handle)
                    .unwrap_or(false)
            },
            |&id| self.slots.get(id).map(|e| e.hash).unwrap_or(0),
        ) {
            hashbrown::hash_table::Entry::Occupied(_) => Err(InsertError::DuplicateKey(value)),
            hashbrown::hash_table::Entry::Vacant(v) => {
                let id = self.slots.insert(Entry {
                    handle,
                    value,
                    hash,
                });
                let _ = v.insert(id);
                Ok(id)
            }
        }
    }

    /// Remove the entry behind `id`. `None` when `id` is stale.
    pub fn remove(&mut self, id: EntryId) -> Option<(ContextHandle, V)> {
        let entry = self.slots.remove(id)?;

        if let Ok(found) = self.index.find_entry(entry.hash, |&kk| kk == id) {
            found.remove();
        }

        Some((entry.handle, entry.value))
    }

    pub fn entry(&self, id: EntryId) -> Option<(ContextHandle, &V)> {
        self.slots.get(id).map(|e| (e.handle, &e.value))
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            it: self.slots.iter(),
        }
    }
}
