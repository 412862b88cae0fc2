use crate::config::SLOT_REUSE_LIMIT;
use crate::error::ScheduleError;
use crate::task::{TaskSlot, PAYLOAD_OFFSET};
use taskpool_core::queue::SegmentedQueue;

/// Recycles empty task slots between schedulings.
///
/// Returned slots wait on a lock-free queue; an `acquire` prefers one of
/// those over a fresh allocation, so a pool under steady load stops
/// allocating entirely. Two rules keep the queue healthy:
///
/// - only slots whose total size is under the reuse limit enter the
///   queue; oversized ones are freed on release
/// - a recycled slot smaller than the request is freed, not handed out,
///   so the queue cannot fill up with blocks nothing fits into
pub(crate) struct SlotPool {
    returned: SegmentedQueue<TaskSlot>,
}

impl SlotPool {
    pub(crate) fn new() -> Self {
        Self {
            returned: SegmentedQueue::new(),
        }
    }

    /// Hands out an empty slot with at least `capacity` payload bytes.
    pub(crate) fn acquire(&self, capacity: usize) -> Result<TaskSlot, ScheduleError> {
        // Oversized requests bypass the queue entirely; nothing that size
        // is ever recycled.
        if PAYLOAD_OFFSET + capacity < SLOT_REUSE_LIMIT {
            // A few attempts, not a scan: stale undersized slots get freed
            // as they surface, and the queue must not be drained looking
            // for a perfect fit.
            for _ in 0..3 {
                match self.returned.try_pop() {
                    Some(slot) => {
                        debug_assert!(!slot.is_armed(), "armed slot in the reuse queue");
                        if slot.capacity() >= capacity {
                            return Ok(slot);
                        }
                        drop(slot);
                    }
                    None => break,
                }
            }
        }

        TaskSlot::allocate(capacity).ok_or(ScheduleError::OutOfMemory)
    }

    /// Takes an empty slot back, queueing or freeing it by size.
    ///
    /// Slots that cannot be queued (reuse limit, or the queue itself
    /// failing to grow) are simply dropped; releasing never fails.
    pub(crate) fn release(&self, slot: TaskSlot) {
        debug_assert!(!slot.is_armed(), "released slot still carries a task");
        if slot.total_size() < SLOT_REUSE_LIMIT {
            // An append error hands the slot back; letting it fall out of
            // scope frees it.
            let _ = self.returned.try_append(slot);
        }
    }

    /// Number of slots currently waiting for reuse (approximate).
    #[cfg(test)]
    pub(crate) fn recyclable(&self) -> usize {
        self.returned.len()
    }
}

// Dropping the pool drops the queue, which drops every waiting slot.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_prefers_recycled_slot() {
        let pool = SlotPool::new();

        let slot = pool.acquire(32).unwrap();
        pool.release(slot);
        assert_eq!(pool.recyclable(), 1);

        let again = pool.acquire(16).unwrap();
        assert!(again.capacity() >= 16);
        assert_eq!(pool.recyclable(), 0, "the recycled slot was not reused");
    }

    #[test]
    fn test_undersized_recycled_slot_is_discarded() {
        let pool = SlotPool::new();

        let small = pool.acquire(8).unwrap();
        pool.release(small);
        assert_eq!(pool.recyclable(), 1);

        // The request does not fit the queued slot; a fresh one is
        // allocated and the stale one is gone.
        let big = pool.acquire(64).unwrap();
        assert!(big.capacity() >= 64);
        assert_eq!(pool.recyclable(), 0);
    }

    #[test]
    fn test_oversized_slot_is_not_recycled() {
        let pool = SlotPool::new();

        let huge = pool.acquire(SLOT_REUSE_LIMIT * 2).unwrap();
        pool.release(huge);
        assert_eq!(pool.recyclable(), 0);
    }

    #[test]
    fn test_release_acquire_cycle_settles() {
        let pool = SlotPool::new();

        // Steady-state churn keeps exactly one slot in circulation.
        for _ in 0..100 {
            let slot = pool.acquire(24).unwrap();
            pool.release(slot);
        }
        assert_eq!(pool.recyclable(), 1);
    }
}
