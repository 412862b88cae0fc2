//! taskpool - A Thread Pool with Reusable Task Slots
//!
//! Workers are spawned lazily up to a maximum, shrink back to a minimum
//! when idle, and hand results back through one-shot completion handles.
//! Every scheduled task costs one heap allocation (a fixed-layout task
//! slot), and small slots are recycled through a lock-free pool, so a
//! steady stream of tasks settles into allocation-free scheduling.
//!
//! Scheduling never blocks. Destroying the pool cancels every task still
//! waiting in the queue: their handles resolve to
//! [`TaskError::BrokenPromise`] instead of hanging. Tasks that already
//! run are allowed to finish, and a panicking task never takes a worker
//! down; the panic is routed into the task's handle.
//!
//! # Example
//!
//! ```
//! use taskpool::ThreadPool;
//!
//! let pool = ThreadPool::with_defaults().unwrap();
//!
//! let handle = pool.schedule(|| (12 * 34) - 12 - 34).unwrap();
//! assert_eq!(handle.get().unwrap(), 362);
//! ```
//!
//! Built on the queues and wait primitives of [`taskpool_core`].

mod completion;
pub mod config;
mod error;
mod pool;
mod slot_pool;
mod task;

pub use completion::CompletionHandle;
pub use error::{PoolError, ScheduleError, TaskError};
pub use pool::ThreadPool;
