//! Object pool - fixed-capacity allocator for book-internal nodes.
//!
//! All per-order and per-level allocations in the hot path come from pools
//! pre-sized at startup; the global allocator is never touched while the
//! engine runs. Slots are addressed by `u32` index rather than pointer, which
//! halves link metadata in the nodes and sidesteps self-referential lifetime
//! issues in the intrusive lists built on top.
//!
//! Each slot carries a free flag; `acquire` scans from a cursor so that
//! adjacent allocations tend to land in adjacent slots. A pool is owned by
//! exactly one thread (the engine owns the book pools), so a full sweep of
//! the cursor finding nothing free is exhaustion, not contention.

use std::fmt;

/// Sentinel for "no slot" in intrusive links.
pub const NULL_INDEX: u32 = u32::MAX;

/// Index of a slot inside a [`Pool`].
pub type PoolIndex = u32;

struct Slot<T> {
    value: T,
    free: bool,
}

/// Fixed-capacity pool of `T` slots with a free flag per slot.
pub struct Pool<T> {
    slots: Vec<Slot<T>>,
    cursor: usize,
    in_use: u32,
}

impl<T: Default> Pool<T> {
    /// Create a pool with all slots free, pre-constructed via `T::default()`.
    ///
    /// # Panics
    /// Panics if `capacity` is zero, not a power of two, or would collide
    /// with [`NULL_INDEX`].
    pub fn new(capacity: u32) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "pool capacity must be a power of two, got {capacity}"
        );
        assert!(capacity < NULL_INDEX, "pool capacity must be below NULL_INDEX");
        let slots = (0..capacity)
            .map(|_| Slot {
                value: T::default(),
                free: true,
            })
            .collect();
        Self {
            slots,
            cursor: 0,
            in_use: 0,
        }
    }

    /// Claim a free slot and move `value` into it.
    ///
    /// Returns `None` when the pool is exhausted. Callers must handle
    /// exhaustion explicitly; for the engine's book pools it is fatal.
    #[inline]
    pub fn acquire(&mut self, value: T) -> Option<PoolIndex> {
        let cap = self.slots.len();
        for _ in 0..cap {
            let idx = self.cursor;
            self.cursor = (self.cursor + 1) & (cap - 1);
            let slot = &mut self.slots[idx];
            if slot.free {
                slot.free = false;
                slot.value = value;
                self.in_use += 1;
                return Some(idx as PoolIndex);
            }
        }
        None
    }

    /// Return a slot to the pool. The element is reset to `T::default()`.
    ///
    /// # Panics
    /// Releasing an index outside the pool's storage, or a slot that is not
    /// currently occupied, is a programming error and panics.
    #[inline]
    pub fn release(&mut self, index: PoolIndex) {
        assert!(
            (index as usize) < self.slots.len(),
            "release of index {index} outside pool storage"
        );
        let slot = &mut self.slots[index as usize];
        assert!(!slot.free, "double release of pool slot {index}");
        slot.free = true;
        slot.value = T::default();
        self.in_use -= 1;
    }

    #[inline]
    pub fn get(&self, index: PoolIndex) -> &T {
        debug_assert!((index as usize) < self.slots.len(), "index out of bounds");
        debug_assert!(!self.slots[index as usize].free, "access to freed slot");
        &self.slots[index as usize].value
    }

    #[inline]
    pub fn get_mut(&mut self, index: PoolIndex) -> &mut T {
        debug_assert!((index as usize) < self.slots.len(), "index out of bounds");
        debug_assert!(!self.slots[index as usize].free, "access to freed slot");
        &mut self.slots[index as usize].value
    }

    /// Number of occupied slots.
    #[inline]
    pub fn in_use(&self) -> u32 {
        self.in_use
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_use == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.in_use as usize == self.slots.len()
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.slots.len())
            .field("in_use", &self.in_use)
            .field("cursor", &self.cursor)
            .finish()
    }
}
