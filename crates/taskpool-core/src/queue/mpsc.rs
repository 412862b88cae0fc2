use crate::error::AppendError;
use crate::queue::invariants::{debug_assert_cell_lap, debug_assert_cursor_monotonic};
use crate::queue::round_up_capacity;
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

/// One ring slot plus its lap counter.
struct Cell<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer single-consumer queue.
///
/// The producer side runs the same cell lap protocol as
/// [`MpmcQueue`](crate::queue::MpmcQueue) (see the protocol notes there);
/// the consumer side exploits its exclusivity: with exactly one consumer
/// there is no contention on `head`, so pops claim positions with a plain
/// store instead of a compare-and-swap. Observable behavior is identical
/// to the MPMC ring restricted to one consumer.
///
/// # Usage contract
///
/// Any number of threads may call [`try_append`](Self::try_append); at most
/// one thread may call [`try_pop`](Self::try_pop) concurrently.
#[repr(C)]
pub struct MpscQueue<T> {
    /// Next position to claim for writing (contended by producers).
    tail: CachePadded<AtomicU64>,
    /// Next position to read. Written only by the consumer; producers read
    /// it merely for `len`.
    head: CachePadded<AtomicU64>,
    mask: u64,
    cells: Box<[Cell<T>]>,
}

// Safety: values cross threads, so T: Send is required. Slot access is
// bracketed by the cell lap protocol; head is single-writer by contract.
unsafe impl<T: Send> Send for MpscQueue<T> {}
unsafe impl<T: Send> Sync for MpscQueue<T> {}

impl<T> MpscQueue<T> {
    /// Creates a queue with at least `capacity` slots (rounded up to a
    /// power of two).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or beyond 2^31 slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = round_up_capacity(capacity);

        let mut cells = Vec::with_capacity(capacity);
        for i in 0..capacity {
            cells.push(Cell {
                seq: AtomicU64::new(i as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            mask: (capacity - 1) as u64,
            cells: cells.into_boxed_slice(),
        }
    }

    /// Returns the number of slots, always a power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Returns an instantaneous approximation of the item count.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Relaxed);
        (tail.saturating_sub(head) as usize).min(self.capacity())
    }

    /// Returns `true` if the queue appears empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) >= self.tail.load(Ordering::Relaxed)
    }

    /// Appends a value, or hands it back if the queue is full.
    ///
    /// Safe to call from any number of threads; never blocks.
    pub fn try_append(&self, value: T) -> Result<(), AppendError<T>> {
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let cell = &self.cells[(tail & self.mask) as usize];
            let seq = cell.seq.load(Ordering::Acquire);

            if seq == tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        debug_assert_cell_lap!(seq, tail);
                        // SAFETY: winning the CAS gives this producer sole
                        // ownership of the cell until the Release store of
                        // the sequence counter publishes it.
                        unsafe {
                            (*cell.value.get()).write(value);
                        }
                        cell.seq.store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        tail = current;
                        backoff.spin();
                    }
                }
            } else if seq < tail {
                return Err(AppendError::Full(value));
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Pops the oldest value, or returns `None` if the queue is empty.
    ///
    /// Consumer side only; see the usage contract on the type.
    pub fn try_pop(&self) -> Option<T> {
        // Only this thread writes head, so a Relaxed load reads our own
        // last store.
        let head = self.head.load(Ordering::Relaxed);

        let cell = &self.cells[(head & self.mask) as usize];
        let seq = cell.seq.load(Ordering::Acquire);
        let expected = head.wrapping_add(1);

        if seq != expected {
            // seq < expected: the producer at this position has not
            // published yet. seq > expected cannot happen with a single
            // consumer.
            debug_assert!(seq < expected, "second consumer detected on MpscQueue");
            return None;
        }

        // SAFETY: the Acquire load of `seq` pairs with the producer's
        // Release store; this is the only consumer, so no one else reads
        // the slot.
        let value = unsafe { (*cell.value.get()).assume_init_read() };
        cell.seq.store(
            head.wrapping_add(self.mask).wrapping_add(1),
            Ordering::Release,
        );

        let new_head = head.wrapping_add(1);
        debug_assert_cursor_monotonic!("head", head, new_head);
        self.head.store(new_head, Ordering::Release);

        Some(value)
    }
}

impl<T> Drop for MpscQueue<T> {
    fn drop(&mut self) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        let mut pos = head;
        while pos != tail {
            let cell = &mut self.cells[(pos & self.mask) as usize];
            if cell.seq.load(Ordering::Relaxed) == pos.wrapping_add(1) {
                // SAFETY: &mut self guarantees exclusive access; the lap
                // counter says this slot holds an initialized value.
                unsafe {
                    ptr::drop_in_place((*cell.value.get()).as_mut_ptr());
                }
            }
            pos = pos.wrapping_add(1);
        }
    }
}
