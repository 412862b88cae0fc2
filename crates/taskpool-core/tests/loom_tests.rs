//! Loom-based concurrency tests.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! Loom exhaustively explores thread interleavings, which catches ordering
//! bugs that stochastic stress tests only hit by luck. The models below
//! reproduce the synchronization protocols of the real queues in
//! miniature: the state space has to stay small for exhaustive search, so
//! each model keeps the protocol and shrinks everything else (capacity,
//! item counts, thread counts).

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

/// The SPSC protocol: relaxed own-cursor loads, acquire counterpart
/// loads, release publishes.
struct SpscModel {
    tail: AtomicU64,
    head: AtomicU64,
    buffer: UnsafeCell<[u64; 2]>,
}

unsafe impl Send for SpscModel {}
unsafe impl Sync for SpscModel {}

impl SpscModel {
    fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            head: AtomicU64::new(0),
            buffer: UnsafeCell::new([0; 2]),
        }
    }

    fn try_append(&self, value: u64) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail - head >= 2 {
            return false;
        }
        // SAFETY: the slot at `tail` is outside the consumer's window.
        unsafe {
            (*self.buffer.get())[(tail % 2) as usize] = value;
        }
        self.tail.store(tail + 1, Ordering::Release);
        true
    }

    fn try_pop(&self) -> Option<u64> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: head < tail, so the slot was published by the producer.
        let value = unsafe { (*self.buffer.get())[(head % 2) as usize] };
        self.head.store(head + 1, Ordering::Release);
        Some(value)
    }
}

#[test]
fn loom_spsc_handoff_is_visible() {
    loom::model(|| {
        let queue = Arc::new(SpscModel::new());

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                assert!(queue.try_append(41));
                assert!(queue.try_append(42));
            })
        };

        let mut received = Vec::new();
        while received.len() < 2 {
            if let Some(value) = queue.try_pop() {
                received.push(value);
            } else {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
        assert_eq!(received, vec![41, 42]);
    });
}

/// The MPMC cell protocol: a lap counter per slot, claimed by CAS on the
/// shared cursor, published by a release store of the counter.
struct MpmcModel {
    tail: AtomicU64,
    head: AtomicU64,
    seq: [AtomicU64; 2],
    values: UnsafeCell<[u64; 2]>,
}

unsafe impl Send for MpmcModel {}
unsafe impl Sync for MpmcModel {}

impl MpmcModel {
    fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            head: AtomicU64::new(0),
            seq: [AtomicU64::new(0), AtomicU64::new(1)],
            values: UnsafeCell::new([0; 2]),
        }
    }

    fn try_append(&self, value: u64) -> bool {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let cell = (tail % 2) as usize;
            let seq = self.seq[cell].load(Ordering::Acquire);
            if seq == tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS owns the cell until the
                        // release store below.
                        unsafe {
                            (*self.values.get())[cell] = value;
                        }
                        self.seq[cell].store(tail + 1, Ordering::Release);
                        return true;
                    }
                    Err(current) => tail = current,
                }
            } else if seq < tail {
                return false;
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    fn try_pop(&self) -> Option<u64> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let cell = (head % 2) as usize;
            let seq = self.seq[cell].load(Ordering::Acquire);
            if seq == head + 1 {
                match self.head.compare_exchange_weak(
                    head,
                    head + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS makes this thread the
                        // only reader of the published cell.
                        let value = unsafe { (*self.values.get())[cell] };
                        self.seq[cell].store(head + 2, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => head = current,
                }
            } else if seq < head + 1 {
                return None;
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

#[test]
fn loom_mpmc_two_producers_no_loss() {
    loom::model(|| {
        let queue = Arc::new(MpmcModel::new());

        let producers: Vec<_> = (0..2)
            .map(|id| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    while !queue.try_append(10 + id) {
                        thread::yield_now();
                    }
                })
            })
            .collect();

        let mut received = Vec::new();
        while received.len() < 2 {
            if let Some(value) = queue.try_pop() {
                received.push(value);
            } else {
                thread::yield_now();
            }
        }

        for producer in producers {
            producer.join().unwrap();
        }
        received.sort_unstable();
        assert_eq!(received, vec![10, 11]);
    });
}

#[test]
fn loom_mpmc_concurrent_pop_no_duplication() {
    loom::model(|| {
        let queue = Arc::new(MpmcModel::new());
        assert!(queue.try_append(7));
        assert!(queue.try_append(8));

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.try_pop())
            })
            .collect();

        let mut received: Vec<u64> = consumers
            .into_iter()
            .filter_map(|consumer| consumer.join().unwrap())
            .collect();
        received.sort_unstable();

        // Two consumers, two values: each taken at most once.
        let taken = received.len();
        received.dedup();
        assert_eq!(received.len(), taken, "a value was popped twice");
        for value in received {
            assert!(value == 7 || value == 8);
        }
    });
}
