//! SlotAllocator: dense slot indices with first-fit reuse.
//!
//! Slots index into per-context extension blocks, so keeping them dense
//! bounds block size by the number of keys currently registered rather
//! than the number ever created. `acquire` scans linearly for the first
//! released slot; keys come and go at load/unload time only, so the scan
//! is not worth a free list.
//!
//! Not synchronized: callers serialize access (see `KeySpace`).

/// Index of a key's entry in every extension block.
pub type Slot = usize;

#[derive(Debug, Default)]
pub struct SlotAllocator {
    occupied: Vec<bool>,
    in_use: usize,
}

impl SlotAllocator {
    pub const fn new() -> Self {
        Self {
            occupied: Vec::new(),
            in_use: 0,
        }
    }

    /// Reserve the lowest released slot, or a new one past the end.
    pub fn acquire(&mut self) -> Slot {
        self.in_use += 1;
        if let Some(slot) = self.occupied.iter().position(|&o| !o) {
            self.occupied[slot] = true;
            return slot;
        }
        self.occupied.push(true);
        self.occupied.len() - 1
    }

    /// Return a slot for reuse by the next `acquire`.
    ///
    /// Panics if `slot` is not currently reserved.
    pub fn release(&mut self, slot: Slot) {
        match self.occupied.get_mut(slot) {
            Some(o) if *o => *o = false,
            _ => panic!("release of slot {slot} that is not reserved"),
        }
        self.in_use -= 1;
    }

    /// Number of reserved slots.
    pub fn len(&self) -> usize {
        self.in_use
    }
    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    /// Length of the slot sequence: one past the highest slot ever handed
    /// out. Blocks sized to this fit every live key.
    pub fn high_water(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_occupied(&self, slot: Slot) -> bool {
        self.occupied.get(slot).copied().unwrap_or(false)
    }

    /// Reserved slots in ascending order.
    pub fn occupied(&self) -> impl Iterator<Item = Slot> + '_ {
        self.occupied
            .iter()
            .enumerate()
            .filter_map(|(slot, &o)| o.then_some(slot))
    }
}
