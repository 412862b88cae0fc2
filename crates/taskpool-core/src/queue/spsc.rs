use crate::error::AppendError;
use crate::queue::invariants::{
    debug_assert_cursor_monotonic, debug_assert_head_within_tail, debug_assert_within_capacity,
};
use crate::queue::round_up_capacity;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// SYNCHRONIZATION STRATEGY
// =============================================================================
//
// Head and tail are unbounded u64 sequence numbers, never wrapped indices.
// The slot index is computed as `sequence & mask` only at the buffer access,
// which removes the ABA problem outright (a u64 does not wrap in the lifetime
// of a process pushing even tens of billions of items per second).
//
// Producer (try_append):
//   1. Load `tail` Relaxed (only the producer writes tail)
//   2. Check space against `cached_head` (plain cell, producer-private)
//   3. If the cache says full, refresh it: load `head` with Acquire
//   4. Write the value into the slot
//   5. Publish with a Release store of `tail + 1`
//
// Consumer (try_pop) mirrors the same steps on the head side with its own
// `cached_tail`. The cached counterparts keep the fast path free of
// cross-core cache traffic; the Acquire refresh synchronizes with the other
// side's Release store, which is what makes the slot contents visible.
//
// The cached cursors live in UnsafeCell because each has exactly one writer:
// `cached_head` is touched only inside try_append, `cached_tail` only inside
// try_pop. That single-writer property is the SPSC usage contract.
//
// =============================================================================

/// Bounded single-producer single-consumer queue.
///
/// The fastest of the ring variants: neither side ever issues a
/// compare-and-swap, and the common case touches no shared cache line at
/// all thanks to the cached counterpart cursors.
///
/// # Usage contract
///
/// At most one thread may call [`try_append`](Self::try_append) concurrently
/// and at most one thread may call [`try_pop`](Self::try_pop) concurrently.
/// The two sides may (and usually do) run on different threads. Violating
/// this contract is a data race; use [`MpscQueue`](crate::queue::MpscQueue)
/// or [`MpmcQueue`](crate::queue::MpmcQueue) when more threads are involved.
#[repr(C)]
pub struct SpscQueue<T> {
    // === PRODUCER HOT ===
    /// Tail sequence (written by producer, read by consumer)
    tail: CachePadded<AtomicU64>,
    /// Producer's cached view of head (avoids cross-core reads)
    cached_head: CachePadded<UnsafeCell<u64>>,

    // === CONSUMER HOT ===
    /// Head sequence (written by consumer, read by producer)
    head: CachePadded<AtomicU64>,
    /// Consumer's cached view of tail (avoids cross-core reads)
    cached_tail: CachePadded<UnsafeCell<u64>>,

    // === SHARED, READ-ONLY AFTER CONSTRUCTION ===
    mask: u64,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Safety: the queue hands values across threads, so T must be Send. The
// head/tail protocol above synchronizes every slot access; Sync is sound
// under the one-producer one-consumer usage contract.
unsafe impl<T: Send> Send for SpscQueue<T> {}
unsafe impl<T: Send> Sync for SpscQueue<T> {}

impl<T> SpscQueue<T> {
    /// Creates a queue with at least `capacity` slots.
    ///
    /// The capacity is rounded up to a power of two; the effective value is
    /// reported by [`capacity`](Self::capacity).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or beyond 2^31 slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = round_up_capacity(capacity);

        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));

        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            cached_head: CachePadded::new(UnsafeCell::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            cached_tail: CachePadded::new(UnsafeCell::new(0)),
            mask: (capacity - 1) as u64,
            buffer: buffer.into_boxed_slice(),
        }
    }

    /// Returns the number of slots, always a power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the current number of items.
    ///
    /// Exact while no other thread is modifying the queue, otherwise a
    /// snapshot that was true at some instant during the call.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        tail.wrapping_sub(head) as usize
    }

    /// Returns `true` if the queue holds no items.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Relaxed)
    }

    /// Appends a value, or hands it back if the queue is full.
    ///
    /// Producer side only; see the usage contract on the type.
    pub fn try_append(&self, value: T) -> Result<(), AppendError<T>> {
        let tail = self.tail.load(Ordering::Relaxed);

        // Fast path: the cached head may already prove there is space.
        // SAFETY: cached_head is written only by the producer, which is
        // the thread executing this method.
        let mut head = unsafe { *self.cached_head.get() };

        if tail.wrapping_sub(head) > self.mask {
            // Slow path: refresh the cache. The Acquire load pairs with the
            // consumer's Release store of head.
            head = self.head.load(Ordering::Acquire);
            // SAFETY: single producer-side writer, as above.
            unsafe {
                *self.cached_head.get() = head;
            }
            if tail.wrapping_sub(head) > self.mask {
                return Err(AppendError::Full(value));
            }
        }

        let idx = (tail & self.mask) as usize;
        // SAFETY: space was verified, so the slot at `tail` is outside the
        // consumer's [head, tail) window and owned by the producer until
        // the Release store below publishes it.
        unsafe {
            (*self.buffer[idx].get()).write(value);
        }

        let new_tail = tail.wrapping_add(1);
        debug_assert_cursor_monotonic!("tail", tail, new_tail);
        debug_assert_within_capacity!(new_tail.wrapping_sub(head) as usize, self.capacity());
        self.tail.store(new_tail, Ordering::Release);

        Ok(())
    }

    /// Pops the oldest value, or returns `None` if the queue is empty.
    ///
    /// Consumer side only; see the usage contract on the type.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);

        // SAFETY: cached_tail is written only by the consumer, which is
        // the thread executing this method.
        let mut tail = unsafe { *self.cached_tail.get() };

        if tail == head {
            // Slow path: refresh the cache. The Acquire load pairs with the
            // producer's Release store of tail and makes the slot contents
            // visible.
            tail = self.tail.load(Ordering::Acquire);
            // SAFETY: single consumer-side writer, as above.
            unsafe {
                *self.cached_tail.get() = tail;
            }
            if tail == head {
                return None;
            }
        }

        let idx = (head & self.mask) as usize;
        // SAFETY: head < tail, so the slot was fully written by the
        // producer and published by the Release/Acquire pair above. Reading
        // moves the value out; the slot is dead until the producer laps it.
        let value = unsafe { (*self.buffer[idx].get()).assume_init_read() };

        let new_head = head.wrapping_add(1);
        debug_assert_cursor_monotonic!("head", head, new_head);
        debug_assert_head_within_tail!(new_head, tail);
        self.head.store(new_head, Ordering::Release);

        Some(value)
    }
}

impl<T> Drop for SpscQueue<T> {
    fn drop(&mut self) {
        // Drop every item still sitting in the [head, tail) window.
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        let count = tail.wrapping_sub(head) as usize;

        for i in 0..count {
            let idx = ((head.wrapping_add(i as u64)) & self.mask) as usize;
            // SAFETY: &mut self guarantees exclusive access and the window
            // holds initialized values by the queue protocol.
            unsafe {
                ptr::drop_in_place((*self.buffer[idx].get()).as_mut_ptr());
            }
        }
    }
}
