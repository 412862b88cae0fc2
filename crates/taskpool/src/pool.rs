use crate::completion::{self, CompletionHandle};
use crate::config;
use crate::error::{PoolError, ScheduleError};
use crate::slot_pool::SlotPool;
use crate::task::TaskSlot;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use taskpool_core::queue::SegmentedQueue;
use taskpool_core::sync::{Latch, Semaphore};
use taskpool_core::thread::PoolWorkerScope;

// =============================================================================
// WORKER LIFE CYCLE
// =============================================================================
//
// Each worker occupies one slot in a fixed-size array, guarded by a
// per-slot status byte:
//
//   Empty --reserve--> Starting --entry--> Running
//     ^                                       |
//     |                       idle timeout or |
//     |                       shutdown        v
//   (reuse after join) Dead <------- ShuttingDown / exit
//
// Spawning reserves a slot with a compare-and-swap on the status byte, so
// concurrent growth attempts cannot collide; a Dead slot's thread handle
// is joined before the slot is reused.
//
// The worker loop is heart-beat driven: a worker sleeps on the task
// semaphore for at most the heart-beat interval, so it notices shutdown
// and its own idleness even when no task ever wakes it. A worker that
// went enough heart-beats without work offers to exit, which the pool
// accepts only while more than the minimum crew is alive. A worker that
// sees the backlog outgrow the crew spawns a colleague, up to the
// maximum.
//
// Shutdown is the destructor: set the flag, post the semaphore once per
// possible worker, wait on the lights-out latch (posted on spawn, counted
// down on exit), join what exited and abandon what did not. Every task
// still queued is destroyed without being invoked, resolving its handle
// to a broken promise.
//
// =============================================================================

/// Worker slot states. Starting and Running slots hold a live thread.
const STATUS_DEAD: i8 = -1;
const STATUS_EMPTY: i8 = 0;
const STATUS_STARTING: i8 = 1;
const STATUS_RUNNING: i8 = 2;
const STATUS_SHUTTING_DOWN: i8 = 3;

/// Locks a mutex, shrugging off poisoning; worker handles stay valid
/// regardless of how their guard was released.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WorkerSlot {
    status: AtomicI8,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

struct PoolInner {
    min_workers: usize,
    max_workers: usize,
    /// Workers alive right now (Starting through ShuttingDown).
    live_workers: AtomicUsize,
    /// Tasks enqueued and not yet finished.
    pending_tasks: AtomicUsize,
    shutting_down: AtomicBool,
    /// One permit per scheduled task; lets exactly one worker through.
    task_semaphore: Semaphore,
    /// Reaches zero when the last worker has left its loop.
    lights_out: Latch,
    /// Armed task slots waiting for a worker.
    scheduled: SegmentedQueue<TaskSlot>,
    slot_pool: SlotPool,
    workers: Box<[WorkerSlot]>,
}

/// A pool of worker threads executing scheduled callables.
///
/// The pool starts `min_workers` threads up front, grows lazily to
/// `max_workers` under backlog, and shrinks back when workers sit idle.
/// Work is submitted with [`schedule`](Self::schedule), which never
/// blocks and returns a [`CompletionHandle`] for the result.
///
/// Dropping the pool is the one and only cancellation point: tasks still
/// in the queue are destroyed unrun (their handles resolve to
/// [`TaskError::BrokenPromise`](crate::TaskError::BrokenPromise)), tasks
/// already executing get to finish, and the destructor waits a bounded
/// time for the workers before abandoning any that are stuck in user
/// code.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool").finish_non_exhaustive()
    }
}

impl ThreadPool {
    /// Creates a pool with worker counts fitted to the machine, per
    /// [`config::guess_min_workers`] and [`config::guess_max_workers`].
    pub fn with_defaults() -> Result<Self, PoolError> {
        let processors = config::processor_count();
        Self::new(
            config::guess_min_workers(processors),
            config::guess_max_workers(processors),
        )
    }

    /// Creates a pool that keeps at least `min_workers` threads alive and
    /// grows to at most `max_workers` under load.
    ///
    /// Both bounds must be nonzero and ordered; anything else is
    /// [`PoolError::InvalidConfig`].
    pub fn new(min_workers: usize, max_workers: usize) -> Result<Self, PoolError> {
        if min_workers == 0 || max_workers == 0 || min_workers > max_workers {
            return Err(PoolError::InvalidConfig {
                min: min_workers,
                max: max_workers,
            });
        }

        let mut workers = Vec::with_capacity(max_workers);
        workers.resize_with(max_workers, || WorkerSlot {
            status: AtomicI8::new(STATUS_EMPTY),
            handle: Mutex::new(None),
        });

        let inner = Arc::new(PoolInner {
            min_workers,
            max_workers,
            live_workers: AtomicUsize::new(0),
            pending_tasks: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            task_semaphore: Semaphore::new(0),
            lights_out: Latch::new(0),
            scheduled: SegmentedQueue::new(),
            slot_pool: SlotPool::new(),
            workers: workers.into_boxed_slice(),
        });

        for _ in 0..min_workers {
            PoolInner::add_worker(&inner);
        }

        Ok(Self { inner })
    }

    /// Schedules a callable for execution on a worker thread.
    ///
    /// Returns immediately; the callable runs as soon as a worker is
    /// free. The handle delivers the return value, the panic the callable
    /// raised, or a broken promise if the pool shuts down first. Ignoring
    /// the handle is fine; the task still runs.
    ///
    /// On [`ScheduleError::OutOfMemory`] nothing was enqueued and no
    /// handle exists; the pool remains usable.
    pub fn schedule<F, R>(&self, task: F) -> Result<CompletionHandle<R>, ScheduleError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (completer, handle) = completion::channel();

        // The job owns both the user callable and the sending half of the
        // handle. Catching the panic here keeps workers alive through any
        // user code failure; dropping the job unrun breaks the promise.
        let job = move || match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(value) => completer.set_value(value),
            Err(payload) => completer.set_panicked(panic_message(payload.as_ref())),
        };

        let mut slot = self
            .inner
            .slot_pool
            .acquire(TaskSlot::required_capacity_of(&job))?;
        slot.emplace(job);

        if let Err(rejected) = self.inner.scheduled.try_append(slot) {
            // The queue could not grow; destroy the task unrun. The
            // handle is never handed out, so nobody can wait on it.
            let mut slot = rejected.into_inner();
            slot.cancel();
            return Err(ScheduleError::OutOfMemory);
        }

        self.inner.pending_tasks.fetch_add(1, Ordering::Release);
        // Wake one worker (or keep the next finisher from going to
        // sleep).
        self.inner.task_semaphore.post(1);

        Ok(handle)
    }

    /// Number of worker threads alive right now.
    pub fn worker_count(&self) -> usize {
        self.inner.live_workers.load(Ordering::Acquire)
    }

    /// Number of tasks enqueued or executing (approximate).
    pub fn pending_tasks(&self) -> usize {
        self.inner.pending_tasks.load(Ordering::Acquire)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.inner.shutting_down.store(true, Ordering::Release);

        // One permit per possible worker: every sleeper wakes, observes
        // the flag and leaves without waiting on the semaphore again.
        self.inner.task_semaphore.post(self.inner.max_workers);

        // Bounded patience, in case user code scheduled an eternal task.
        let all_out = self.inner.lights_out.wait_for(config::SHUTDOWN_PATIENCE);
        debug_assert!(all_out, "workers failed to exit within the shutdown patience");

        for worker in &*self.inner.workers {
            let handle = lock(&worker.handle).take();
            if let Some(handle) = handle {
                if all_out || worker.status.load(Ordering::Acquire) < STATUS_STARTING {
                    let _ = handle.join();
                }
                // A thread still stuck in user code is abandoned by
                // dropping its handle; joining it could hang forever.
            }
        }

        // Workers drain the queue on their way out; this pass only
        // matters if a stuck worker was abandoned above.
        self.inner.cancel_all_tasks();
    }
}

impl PoolInner {
    /// Spawns one more worker if a slot is free. Returns `false` when the
    /// pool is full, shutting down, or the OS refuses a thread.
    fn add_worker(inner: &Arc<Self>) -> bool {
        // No new spawns once shutdown began; destruction is walking the
        // slot array and expects it to only lose occupants.
        if inner.shutting_down.load(Ordering::Acquire) {
            return false;
        }

        for (index, worker) in inner.workers.iter().enumerate() {
            let mut status = worker.status.load(Ordering::Acquire);
            while status <= STATUS_EMPTY {
                // Dead or empty: try to reserve the slot.
                match worker.status.compare_exchange_weak(
                    status,
                    STATUS_STARTING,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        // Reap the previous occupant before reuse.
                        if status == STATUS_DEAD {
                            if let Some(old) = lock(&worker.handle).take() {
                                let _ = old.join();
                            }
                        }

                        inner.live_workers.fetch_add(1, Ordering::AcqRel);
                        inner.lights_out.post(1);

                        let pool = Arc::clone(inner);
                        let spawned = thread::Builder::new()
                            .name(format!("taskpool-worker-{index}"))
                            .spawn(move || PoolInner::worker_loop(&pool, index));

                        match spawned {
                            Ok(handle) => {
                                *lock(&worker.handle) = Some(handle);
                                return true;
                            }
                            Err(_) => {
                                // Roll the reservation back; the pool
                                // simply stays at its current size.
                                inner.live_workers.fetch_sub(1, Ordering::AcqRel);
                                inner.lights_out.count_down(1);
                                worker.status.store(STATUS_EMPTY, Ordering::Release);
                                return false;
                            }
                        }
                    }
                    Err(current) => status = current,
                }
            }
        }

        // Every slot is occupied.
        false
    }

    /// The worker thread body.
    fn worker_loop(inner: &Arc<Self>, index: usize) {
        let _membership = PoolWorkerScope::enter();
        inner.workers[index]
            .status
            .store(STATUS_RUNNING, Ordering::Release);

        let mut idle_heart_beats = 0usize;
        // Set when the idle path already took this worker out of the
        // live count.
        let mut already_uncounted = false;

        loop {
            if inner.shutting_down.load(Ordering::Acquire) {
                inner.workers[index]
                    .status
                    .store(STATUS_SHUTTING_DOWN, Ordering::Release);
                inner.cancel_all_tasks();
                break;
            }

            // The semaphore admits one worker per scheduled task; the
            // timeout is the heart beat that keeps idle workers honest.
            let woken = inner
                .task_semaphore
                .wait_for_then_decrement(config::WORKER_HEART_BEAT);
            if !woken {
                idle_heart_beats += 1;
                if idle_heart_beats > config::IDLE_SHUTDOWN_HEART_BEATS {
                    let previous = inner.live_workers.fetch_sub(1, Ordering::AcqRel);
                    if previous > inner.min_workers {
                        // Idle long enough and above the minimum crew.
                        already_uncounted = true;
                        break;
                    }
                    // The minimum crew stays; re-count and stop checking
                    // until something happens.
                    inner.live_workers.fetch_add(1, Ordering::AcqRel);
                    idle_heart_beats = config::IDLE_SHUTDOWN_HEART_BEATS;
                }
            }

            // Grow while the backlog outpaces the crew.
            {
                let live = inner.live_workers.load(Ordering::Acquire);
                if live < inner.max_workers && inner.pending_tasks.load(Ordering::Acquire) > live + 1
                {
                    Self::add_worker(inner);
                }
            }

            if let Some(mut slot) = inner.scheduled.try_pop() {
                idle_heart_beats = 0;
                slot.invoke();
                inner.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                inner.slot_pool.release(slot);
            }
        }

        inner.workers[index]
            .status
            .store(STATUS_DEAD, Ordering::Release);
        if !already_uncounted {
            inner.live_workers.fetch_sub(1, Ordering::AcqRel);
        }
        inner.lights_out.count_down(1);
    }

    /// Fast-forwards through the queue, destroying every task unrun.
    ///
    /// Each cancelled task drops its completion sender, resolving the
    /// caller's handle to a broken promise. Cancelled slots are freed
    /// rather than recycled; the pool is on its way down.
    fn cancel_all_tasks(&self) {
        while let Some(mut slot) = self.scheduled.try_pop() {
            slot.cancel();
            self.pending_tasks.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Extracts a readable message from a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::time::Duration;

    #[test]
    fn test_invalid_bounds_are_rejected() {
        assert_eq!(
            ThreadPool::new(0, 4).unwrap_err(),
            PoolError::InvalidConfig { min: 0, max: 4 }
        );
        assert_eq!(
            ThreadPool::new(2, 0).unwrap_err(),
            PoolError::InvalidConfig { min: 2, max: 0 }
        );
        assert_eq!(
            ThreadPool::new(5, 2).unwrap_err(),
            PoolError::InvalidConfig { min: 5, max: 2 }
        );
    }

    #[test]
    fn test_minimum_crew_starts_immediately() {
        let pool = ThreadPool::new(2, 4).unwrap();
        assert_eq!(pool.worker_count(), 2);
    }

    #[test]
    fn test_schedule_returns_the_value() {
        let pool = ThreadPool::new(1, 2).unwrap();
        let handle = pool.schedule(|| 6 * 7).unwrap();
        assert_eq!(handle.get(), Ok(42));
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("literal message");
        assert_eq!(panic_message(boxed.as_ref()), "literal message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(17u32);
        assert_eq!(panic_message(boxed.as_ref()), "task panicked");
    }

    #[test]
    fn test_worker_survives_a_panicking_task() {
        let pool = ThreadPool::new(1, 1).unwrap();

        let exploding = pool.schedule(|| -> u32 { panic!("underflow") }).unwrap();
        assert_eq!(
            exploding.get(),
            Err(TaskError::Panicked(String::from("underflow")))
        );

        // The same single worker must still be able to run this.
        let after = pool.schedule(|| 5).unwrap();
        assert_eq!(after.get(), Ok(5));
    }

    #[test]
    fn test_drop_cancels_queued_tasks() {
        let pool = ThreadPool::new(1, 1).unwrap();

        // The first task occupies the only worker long enough for the
        // pool to be destroyed underneath the second one.
        let _blocker = pool
            .schedule(|| taskpool_core::thread::sleep(Duration::from_millis(100)))
            .unwrap();
        let starved = pool.schedule(|| (12 * 34) - 12 - 34).unwrap();

        drop(pool);
        assert_eq!(starved.get(), Err(TaskError::BrokenPromise));
    }
}
