//! Lock-free FIFO queues with selectable concurrency classes.
//!
//! Three bounded rings cover the producer/consumer combinations that occur
//! in practice, each no stronger (and no slower) than its access pattern
//! requires:
//!
//! - [`SpscQueue`]: one producer, one consumer
//! - [`MpscQueue`]: many producers, one consumer
//! - [`MpmcQueue`]: many producers, many consumers
//!
//! [`SegmentedQueue`] is the unbounded MPMC variant, growing in fixed-size
//! blocks. All four share the same non-blocking surface: `try_append` hands
//! the value back on failure, `try_pop` returns `None` when empty, and
//! `len` is an instantaneous approximation under concurrent modification.
//!
//! None of the operations block. Contended compare-and-swap loops back off
//! with `crossbeam_utils::Backoff` but never park the thread.

mod invariants;
mod mpmc;
mod mpsc;
mod seg;
mod spsc;

pub use mpmc::MpmcQueue;
pub use mpsc::MpscQueue;
pub use seg::SegmentedQueue;
pub use spsc::SpscQueue;

/// Rounds a requested capacity up to the power of two the rings index with.
///
/// A minimum of two slots keeps the full/empty distinction trivial even for
/// degenerate requests.
pub(crate) fn round_up_capacity(requested: usize) -> usize {
    assert!(requested > 0, "queue capacity must be at least 1");
    assert!(
        requested <= (1 << 31),
        "queue capacity must not exceed 2^31 slots"
    );
    requested.next_power_of_two().max(2)
}
