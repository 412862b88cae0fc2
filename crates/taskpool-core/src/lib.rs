//! taskpool-core - Lock-Free Queues and Thread Coordination Primitives
//!
//! The foundation layer of the `taskpool` workspace: bounded and unbounded
//! lock-free FIFO queues with selectable producer/consumer concurrency
//! classes, single-owner ring/shift buffers, blocking wait primitives with
//! monotonic timed waits, and small thread utilities.
//!
//! # Key Features
//!
//! - Bounded SPSC / MPSC / MPMC rings (cached sequence numbers, per-cell
//!   lap counters, 128-byte padding against false sharing)
//! - Unbounded segmented MPMC queue (linked fixed-size blocks, allocation
//!   failure reported instead of aborting)
//! - Gate / Latch / Semaphore that time out against the monotonic clock
//! - CPU affinity masks and pool-membership detection for worker threads
//!
//! # Example
//!
//! ```
//! use taskpool_core::queue::MpmcQueue;
//!
//! let queue = MpmcQueue::<u64>::with_capacity(16);
//!
//! assert!(queue.try_append(42).is_ok());
//! assert_eq!(queue.try_pop(), Some(42));
//! assert_eq!(queue.try_pop(), None);
//! ```

pub mod buffer;
mod error;
pub mod queue;
pub mod sync;
pub mod thread;

pub use buffer::{RingBuffer, ShiftBuffer};
pub use error::{AppendError, QueueError, ThreadError};
pub use queue::{MpmcQueue, MpscQueue, SegmentedQueue, SpscQueue};
pub use sync::{Gate, Latch, Semaphore};
