use crate::error::AppendError;
use crate::queue::invariants::debug_assert_cell_lap;
use crate::queue::round_up_capacity;
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// CELL LAP PROTOCOL
// =============================================================================
//
// Every slot carries its own sequence counter encoding which "lap" of the
// ring may currently use it:
//
//   seq == pos            the cell is free for the producer claiming `pos`
//   seq == pos + 1        the cell holds the value written at `pos`
//   seq == pos + capacity the cell has been consumed and waits for the
//                         producer of the next lap
//
// A producer claims a position with a CAS on `tail`, writes the value, then
// publishes by storing `seq = pos + 1` with Release. That store is the
// linearization point of the append: the consumer's Acquire load of the
// same counter is what makes the value visible. Consumers mirror the scheme
// on `head`, handing the cell to the next lap with `seq = pos + capacity`.
//
// Producers and consumers never block each other: a producer that sees a
// stale sequence concludes "full" from `seq < pos` without touching `head`,
// and symmetrically for consumers. CAS losers retry with exponential
// backoff but never park.
//
// =============================================================================

/// One ring slot plus its lap counter.
struct Cell<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded multi-producer multi-consumer queue.
///
/// Any number of threads may append and pop concurrently. Appends by one
/// thread are popped in that thread's program order; across threads the
/// order is the one in which the cell publishes linearized.
#[repr(C)]
pub struct MpmcQueue<T> {
    /// Next position to claim for writing.
    tail: CachePadded<AtomicU64>,
    /// Next position to claim for reading.
    head: CachePadded<AtomicU64>,
    mask: u64,
    cells: Box<[Cell<T>]>,
}

// Safety: values cross threads, so T: Send is required. All slot accesses
// are bracketed by the cell lap protocol above.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
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
    ///
    /// Under concurrent modification the value may lag either cursor, but
    /// it is always within `0..=capacity`.
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
    /// Never blocks; CAS losers retry with backoff.
    pub fn try_append(&self, value: T) -> Result<(), AppendError<T>> {
        let backoff = Backoff::new();
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let cell = &self.cells[(tail & self.mask) as usize];
            let seq = cell.seq.load(Ordering::Acquire);

            if seq == tail {
                // The cell is free for this lap; claim the position.
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        debug_assert_cell_lap!(seq, tail);
                        // SAFETY: winning the CAS gives this thread sole
                        // ownership of the cell until the Release store of
                        // the sequence counter publishes it to consumers.
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
                // The cell still carries last lap's value: the ring is full.
                return Err(AppendError::Full(value));
            } else {
                // Another producer already claimed this position; catch up.
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Pops the oldest value, or returns `None` if the queue is empty.
    ///
    /// Never blocks; CAS losers retry with backoff.
    pub fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let cell = &self.cells[(head & self.mask) as usize];
            let seq = cell.seq.load(Ordering::Acquire);
            let expected = head.wrapping_add(1);

            if seq == expected {
                // The cell holds a published value; claim the position.
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the Acquire load of `seq` above pairs with
                        // the producer's Release store, so the value is
                        // fully written and visible. Winning the CAS makes
                        // this thread its sole reader.
                        let value = unsafe { (*cell.value.get()).assume_init_read() };
                        // Hand the cell to the producer of the next lap.
                        cell.seq.store(
                            head.wrapping_add(self.mask).wrapping_add(1),
                            Ordering::Release,
                        );
                        return Some(value);
                    }
                    Err(current) => {
                        head = current;
                        backoff.spin();
                    }
                }
            } else if seq < expected {
                // The producer for this position has not published: empty.
                return None;
            } else {
                // Another consumer already claimed this position; catch up.
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        // Walk every cell and drop the ones still holding a published,
        // unconsumed value (seq == pos + 1 for the pending lap).
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
