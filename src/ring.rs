//! SPSC ring queue - the transport primitive between pipeline threads.
//!
//! Bounded FIFO between exactly one producer and exactly one consumer,
//! carrying plain-data messages by value. The slot handed to the producer IS
//! the queue storage; there is no internal copy. Publication pairs a release
//! store on the write index with an acquire load on the consumer side, so the
//! producer's slot writes happen-before the consumer's reads of that slot.
//!
//! Both indices increase monotonically and are masked by `capacity - 1` to
//! address slots, so all `capacity` slots are usable.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Keeps the two hot atomics on separate cache lines.
#[repr(align(64))]
struct CachePadded<T>(T);

struct Inner<T> {
    slots: Box<[UnsafeCell<T>]>,
    mask: usize,
    /// Next slot index to write; owned by the producer, read by the consumer.
    write: CachePadded<AtomicUsize>,
    /// Next slot index to read; owned by the consumer, read by the producer.
    read: CachePadded<AtomicUsize>,
}

// Safety: the write/read index protocol gives each slot exactly one owner at
// any time; a slot is only read after the release store that published it.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

/// Producer half. Write with [`Producer::reserve`] then [`Producer::commit`].
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

/// Consumer half. Read with [`Consumer::peek`] then [`Consumer::release`].
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

/// Create a ring of `capacity` slots, pre-filled with `T::default()`.
///
/// # Panics
/// Panics if `capacity` is zero or not a power of two.
pub fn ring<T: Default>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(
        capacity.is_power_of_two(),
        "ring capacity must be a power of two, got {capacity}"
    );
    let slots: Box<[UnsafeCell<T>]> = (0..capacity).map(|_| UnsafeCell::new(T::default())).collect();
    let inner = Arc::new(Inner {
        slots,
        mask: capacity - 1,
        write: CachePadded(AtomicUsize::new(0)),
        read: CachePadded(AtomicUsize::new(0)),
    });
    (
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    )
}

impl<T> Producer<T> {
    /// Next writable slot, or `None` when the queue is full.
    ///
    /// The returned reference is the queue's own storage; fill it by value,
    /// then call [`Producer::commit`] to publish it. Reserving again without
    /// committing returns the same slot.
    #[inline]
    pub fn reserve(&mut self) -> Option<&mut T> {
        let write = self.inner.write.0.load(Ordering::Relaxed);
        let read = self.inner.read.0.load(Ordering::Acquire);
        if write.wrapping_sub(read) == self.inner.slots.len() {
            return None;
        }
        let idx = write & self.inner.mask;
        // Safety: the slot at `write` is not visible to the consumer until
        // commit(), and the producer half is exclusive (`&mut self`).
        Some(unsafe { &mut *self.inner.slots[idx].get() })
    }

    /// Publish the slot filled after the last [`Producer::reserve`].
    #[inline]
    pub fn commit(&mut self) {
        let write = self.inner.write.0.load(Ordering::Relaxed);
        self.inner.write.0.store(write.wrapping_add(1), Ordering::Release);
    }

    /// Reserve-fill-commit in one call; gives the value back when full.
    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        match self.reserve() {
            Some(slot) => {
                *slot = value;
                self.commit();
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Spin until space is available. Used where back-pressure policy is
    /// "never drop": the engine's outbound rings.
    #[inline]
    pub fn push_spin(&mut self, value: T) {
        let mut value = value;
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(v) => {
                    value = v;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Number of published, unconsumed messages.
    #[inline]
    pub fn len(&self) -> usize {
        let write = self.inner.write.0.load(Ordering::Acquire);
        let read = self.inner.read.0.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }
}

impl<T> Consumer<T> {
    /// Oldest unread message, or `None` when the queue is empty.
    ///
    /// The message stays in the queue until [`Consumer::release`].
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        let read = self.inner.read.0.load(Ordering::Relaxed);
        if read == self.inner.write.0.load(Ordering::Acquire) {
            return None;
        }
        let idx = read & self.inner.mask;
        // Safety: `read < write` so this slot was published by a release
        // store we have acquired.
        Some(unsafe { &*self.inner.slots[idx].get() })
    }

    /// Discard the slot returned by the last [`Consumer::peek`].
    /// Returns `false` if the queue was empty.
    #[inline]
    pub fn release(&mut self) -> bool {
        let read = self.inner.read.0.load(Ordering::Relaxed);
        if read == self.inner.write.0.load(Ordering::Acquire) {
            return false;
        }
        self.inner.read.0.store(read.wrapping_add(1), Ordering::Release);
        true
    }

    /// Peek-copy-release in one call.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T>
    where
        T: Copy,
    {
        let value = *self.peek()?;
        self.release();
        Some(value)
    }

    /// Number of published, unconsumed messages.
    #[inline]
    pub fn len(&self) -> usize {
        let write = self.inner.write.0.load(Ordering::Acquire);
        let read = self.inner.read.0.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
