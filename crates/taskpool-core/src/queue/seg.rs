use crate::error::AppendError;
use crossbeam_utils::{Backoff, CachePadded};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{self, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

// =============================================================================
// SEGMENTED QUEUE LAYOUT
// =============================================================================
//
// Storage is a linked list of fixed-size blocks. Global head/tail indices
// count positions; `index >> SHIFT` is the position, bit 0 of the head
// index (`HAS_NEXT`) caches "a block beyond mine exists". Each lap of LAP
// positions maps onto one block: offsets 0..BLOCK_CAP address its slots and
// the final offset is a marker position used while the next block is being
// linked in, so a lap claims one more position than the block has slots.
//
// Producers claim a position with a CAS on the tail index, write the value
// into the slot, then publish it by setting the slot's WRITE bit with
// Release. The producer that claims the last slot of a block installs the
// successor block (allocated before the CAS so the install cannot fail) and
// bumps the tail index past the marker offset; producers that observe the
// marker offset spin until the install completes.
//
// Consumers mirror the scheme on the head index. A consumer that would pass
// the tail index returns "empty" instead. Block reclamation is cooperative:
// the consumer of a block's last slot starts destruction, and any slot whose
// reader is still inside it gets a DESTROY mark so that reader finishes the
// job. Exactly one thread frees each block.
//
// Bounded rings never allocate after construction; this queue allocates one
// block per LAP appends and reports allocation failure to the caller
// instead of aborting.
//
// =============================================================================

/// Positions per lap; one of them is the block-link marker.
const LAP: u64 = 32;
/// Usable slots per block.
const BLOCK_CAP: usize = (LAP as usize) - 1;
/// Index bits below the position number.
const SHIFT: u64 = 1;
/// Head-index bit: a block beyond the current one is known to exist.
const HAS_NEXT: u64 = 1;

/// Slot state bit: a value has been written into the slot.
const WRITE: usize = 1;
/// Slot state bit: the value has been read out of the slot.
const READ: usize = 2;
/// Slot state bit: the block is being destroyed; the reader inside this
/// slot must continue the destruction.
const DESTROY: usize = 4;

/// One queue slot.
struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    state: AtomicUsize,
}

impl<T> Slot<T> {
    /// Spins until the producer that claimed this slot has published it.
    ///
    /// The claim CAS already succeeded, so the wait is bounded by that
    /// producer finishing one plain store.
    fn wait_write(&self) {
        let backoff = Backoff::new();
        while self.state.load(Ordering::Acquire) & WRITE == 0 {
            backoff.snooze();
        }
    }
}

/// A block in the linked list.
struct Block<T> {
    next: AtomicPtr<Block<T>>,
    slots: [Slot<T>; BLOCK_CAP],
}

impl<T> Block<T> {
    /// Allocates a zeroed block, or `None` if the allocator fails.
    ///
    /// All-zero bytes are a valid empty block: null `next`, state 0 in
    /// every slot, uninitialized values.
    fn try_alloc() -> Option<*mut Block<T>> {
        let layout = Layout::new::<Block<T>>();
        // SAFETY: Block has nonzero size (BLOCK_CAP slots plus a pointer).
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            None
        } else {
            Some(ptr.cast::<Block<T>>())
        }
    }

    /// Frees a block's memory without touching slot contents.
    unsafe fn dealloc_block(this: *mut Block<T>) {
        dealloc(this.cast::<u8>(), Layout::new::<Block<T>>());
    }

    /// Spins until the successor block has been linked in.
    fn wait_next(&self) -> *mut Block<T> {
        let backoff = Backoff::new();
        loop {
            let next = self.next.load(Ordering::Acquire);
            if !next.is_null() {
                return next;
            }
            backoff.snooze();
        }
    }

    /// Reclaims a fully consumed block, starting at slot `start`.
    ///
    /// Slots whose reader has not yet marked READ get the DESTROY mark
    /// instead; the reader that observes it continues from its own slot.
    /// The last slot needs no mark, because its consumer is the thread
    /// that initiates destruction.
    unsafe fn destroy(this: *mut Block<T>, start: usize) {
        for i in start..BLOCK_CAP - 1 {
            let slot = &(*this).slots[i];
            if slot.state.load(Ordering::Acquire) & READ == 0
                && slot.state.fetch_or(DESTROY, Ordering::AcqRel) & READ == 0
            {
                // A reader is still inside this slot; it finishes the job.
                return;
            }
        }
        Self::dealloc_block(this);
    }
}

/// A cursor: global index plus the block it currently points into.
struct Cursor<T> {
    index: AtomicU64,
    block: AtomicPtr<Block<T>>,
}

/// Unbounded multi-producer multi-consumer queue.
///
/// Grows in fixed-size blocks; `try_append` fails only when a new block
/// cannot be allocated, in which case the value is handed back with
/// [`AppendError::OutOfMemory`]. All operations are non-blocking.
pub struct SegmentedQueue<T> {
    tail: CachePadded<Cursor<T>>,
    head: CachePadded<Cursor<T>>,
}

// Safety: values cross threads, so T: Send is required. Slot and block
// hand-off follows the protocol described at the top of the file.
unsafe impl<T: Send> Send for SegmentedQueue<T> {}
unsafe impl<T: Send> Sync for SegmentedQueue<T> {}

impl<T> SegmentedQueue<T> {
    /// Creates an empty queue with its first block in place.
    ///
    /// # Panics
    ///
    /// Panics if the initial block cannot be allocated; later growth
    /// reports failure through `try_append` instead.
    pub fn new() -> Self {
        let first = Block::<T>::try_alloc().expect("allocation of the initial queue block failed");
        Self {
            tail: CachePadded::new(Cursor {
                index: AtomicU64::new(0),
                block: AtomicPtr::new(first),
            }),
            head: CachePadded::new(Cursor {
                index: AtomicU64::new(0),
                block: AtomicPtr::new(first),
            }),
        }
    }

    /// Returns an instantaneous approximation of the item count.
    pub fn len(&self) -> usize {
        let tail = self.tail.index.load(Ordering::SeqCst) >> SHIFT;
        let head = self.head.index.load(Ordering::SeqCst) >> SHIFT;
        // One position per lap is the block-link marker, not a slot.
        let usable = |position: u64| (position - position / LAP) as usize;
        usable(tail).saturating_sub(usable(head))
    }

    /// Returns `true` if the queue appears empty.
    pub fn is_empty(&self) -> bool {
        let head = self.head.index.load(Ordering::SeqCst);
        let tail = self.tail.index.load(Ordering::SeqCst);
        head >> SHIFT == tail >> SHIFT
    }

    /// Appends a value; fails only on allocation failure.
    pub fn try_append(&self, value: T) -> Result<(), AppendError<T>> {
        let backoff = Backoff::new();
        let mut tail = self.tail.index.load(Ordering::Acquire);
        let mut block = self.tail.block.load(Ordering::Acquire);
        // A block allocated ahead of the boundary CAS; kept across retries
        // and released on every exit path that does not install it.
        let mut spare_block: Option<*mut Block<T>> = None;

        loop {
            let offset = ((tail >> SHIFT) % LAP) as usize;

            if offset == BLOCK_CAP {
                // Another producer is installing the next block; wait for
                // the new tail index to appear.
                backoff.snooze();
                tail = self.tail.index.load(Ordering::Acquire);
                block = self.tail.block.load(Ordering::Acquire);
                continue;
            }

            // About to claim the last slot of this block: allocate the
            // successor now so the install after the CAS cannot fail.
            if offset + 1 == BLOCK_CAP && spare_block.is_none() {
                match Block::try_alloc() {
                    Some(fresh) => spare_block = Some(fresh),
                    None => return Err(AppendError::OutOfMemory(value)),
                }
            }

            let new_tail = tail + (1 << SHIFT);
            match self.tail.index.compare_exchange_weak(
                tail,
                new_tail,
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => unsafe {
                    // Claimed the last slot: link the successor and move
                    // the tail index past the marker offset.
                    if offset + 1 == BLOCK_CAP {
                        let next = spare_block
                            .take()
                            .expect("successor block allocated before the boundary claim");
                        let next_index = new_tail.wrapping_add(1 << SHIFT);
                        self.tail.block.store(next, Ordering::Release);
                        self.tail.index.store(next_index, Ordering::Release);
                        (*block).next.store(next, Ordering::Release);
                    }

                    // SAFETY: winning the index CAS proves `block` is still
                    // the current tail block (it cannot be reclaimed until
                    // the head index passes it) and gives this producer
                    // sole ownership of the slot.
                    let slot = &(*block).slots[offset];
                    (*slot.value.get()).write(value);
                    slot.state.fetch_or(WRITE, Ordering::Release);

                    if let Some(unused) = spare_block {
                        Block::dealloc_block(unused);
                    }
                    return Ok(());
                },
                Err(current) => {
                    tail = current;
                    block = self.tail.block.load(Ordering::Acquire);
                    backoff.spin();
                }
            }
        }
    }

    /// Pops the oldest value, or returns `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let backoff = Backoff::new();
        let mut head = self.head.index.load(Ordering::Acquire);
        let mut block = self.head.block.load(Ordering::Acquire);

        loop {
            let offset = ((head >> SHIFT) % LAP) as usize;

            if offset == BLOCK_CAP {
                // A consumer is moving the head to the next block.
                backoff.snooze();
                head = self.head.index.load(Ordering::Acquire);
                block = self.head.block.load(Ordering::Acquire);
                continue;
            }

            let mut new_head = head + (1 << SHIFT);

            if new_head & HAS_NEXT == 0 {
                // The fence orders this tail read after the head read; the
                // matching SeqCst CAS in try_append keeps the pair exact
                // enough for the emptiness test.
                atomic::fence(Ordering::SeqCst);
                let tail = self.tail.index.load(Ordering::Relaxed);

                if head >> SHIFT == tail >> SHIFT {
                    return None;
                }

                // Head and tail in different laps means a successor block
                // already exists; remember that in the index bit.
                if (head >> SHIFT) / LAP != (tail >> SHIFT) / LAP {
                    new_head |= HAS_NEXT;
                }
            }

            match self.head.index.compare_exchange_weak(
                head,
                new_head,
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => unsafe {
                    // Claimed the last slot: move the head to the next
                    // block before reading, so other consumers can proceed.
                    if offset + 1 == BLOCK_CAP {
                        let next = (*block).wait_next();
                        let mut next_index = (new_head & !HAS_NEXT).wrapping_add(1 << SHIFT);
                        if !(*next).next.load(Ordering::Relaxed).is_null() {
                            next_index |= HAS_NEXT;
                        }
                        self.head.block.store(next, Ordering::Release);
                        self.head.index.store(next_index, Ordering::Release);
                    }

                    // SAFETY: winning the index CAS proves `block` is still
                    // the current head block and makes this consumer the
                    // slot's only reader. wait_write pairs with the
                    // producer's Release publish.
                    let slot = &(*block).slots[offset];
                    slot.wait_write();
                    let value = (*slot.value.get()).assume_init_read();

                    // Reclaim the block once every slot has been read.
                    if offset + 1 == BLOCK_CAP {
                        Block::destroy(block, 0);
                    } else if slot.state.fetch_or(READ, Ordering::AcqRel) & DESTROY != 0 {
                        Block::destroy(block, offset + 1);
                    }

                    return Some(value);
                },
                Err(current) => {
                    head = current;
                    block = self.head.block.load(Ordering::Acquire);
                    backoff.spin();
                }
            }
        }
    }
}

impl<T> Default for SegmentedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SegmentedQueue<T> {
    fn drop(&mut self) {
        let mut head = self.head.index.load(Ordering::Relaxed) >> SHIFT;
        let tail = self.tail.index.load(Ordering::Relaxed) >> SHIFT;
        let mut block = self.head.block.load(Ordering::Relaxed);

        // Exclusive access: walk the remaining positions, dropping values
        // and freeing blocks as laps complete.
        while head != tail {
            let offset = (head % LAP) as usize;
            if offset < BLOCK_CAP {
                // SAFETY: every position in [head, tail) was claimed and
                // published by a producer that has since finished.
                unsafe {
                    let slot = &mut (*block).slots[offset];
                    ptr::drop_in_place((*slot.value.get()).as_mut_ptr());
                }
            } else {
                // Marker position: step into the next block.
                unsafe {
                    let next = (*block).next.load(Ordering::Relaxed);
                    Block::dealloc_block(block);
                    block = next;
                }
            }
            head += 1;
        }

        if !block.is_null() {
            // SAFETY: the final block is owned by the queue and no longer
            // referenced by anything else.
            unsafe {
                Block::dealloc_block(block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let queue = SegmentedQueue::<u64>::new();

        assert!(queue.is_empty());
        for i in 0..10 {
            assert!(queue.try_append(i).is_ok());
        }
        assert_eq!(queue.len(), 10);

        for i in 0..10 {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_growth_across_blocks() {
        // Three blocks' worth of items must come back in order.
        let queue = SegmentedQueue::<usize>::new();
        let total = BLOCK_CAP * 3 + 5;

        for i in 0..total {
            assert!(queue.try_append(i).is_ok());
        }
        assert_eq!(queue.len(), total);

        for i in 0..total {
            assert_eq!(queue.try_pop(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_interleaved_block_boundaries() {
        let queue = SegmentedQueue::<usize>::new();
        let mut next_in = 0;
        let mut next_out = 0;

        // Keep roughly half a block in flight while crossing boundaries.
        for _ in 0..BLOCK_CAP * 4 {
            queue.try_append(next_in).unwrap();
            next_in += 1;
            queue.try_append(next_in).unwrap();
            next_in += 1;
            assert_eq!(queue.try_pop(), Some(next_out));
            next_out += 1;
        }
        while let Some(value) = queue.try_pop() {
            assert_eq!(value, next_out);
            next_out += 1;
        }
        assert_eq!(next_out, next_in);
    }

    #[test]
    fn test_drop_releases_pending_items() {
        use std::sync::atomic::AtomicUsize;

        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;
        impl Drop for Tracked {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROPS.store(0, Ordering::SeqCst);
        {
            let queue = SegmentedQueue::<Tracked>::new();
            // Span two blocks so the drop path walks a block boundary.
            for _ in 0..BLOCK_CAP + 8 {
                assert!(queue.try_append(Tracked).is_ok());
            }
            for _ in 0..4 {
                drop(queue.try_pop());
            }
        }
        assert_eq!(DROPS.load(Ordering::SeqCst), BLOCK_CAP + 8);
    }
}
