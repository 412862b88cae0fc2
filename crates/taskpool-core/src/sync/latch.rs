use crate::sync::lock;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Blocks threads until its counter reaches zero.
///
/// Sometimes called a reverse counting semaphore: [`wait`](Self::wait)
/// passes only while the count is zero. Typical use is waiting for a set
/// of tasks to finish, each one calling [`count_down`](Self::count_down)
/// as it completes.
///
/// Unlike the one-shot latch in some libraries, [`post`](Self::post) may
/// raise the count again after it reached zero; the latch re-arms and
/// later waiters block until the new count is worked off. Waiters that
/// were already released stay released.
pub struct Latch {
    count: Mutex<usize>,
    released: Condvar,
}

impl Latch {
    /// Creates a latch that requires `initial_count` count-downs before
    /// waiters pass.
    pub fn new(initial_count: usize) -> Self {
        Self {
            count: Mutex::new(initial_count),
            released: Condvar::new(),
        }
    }

    /// Raises the counter by `n`, re-arming the latch if it was at zero.
    pub fn post(&self, n: usize) {
        let mut count = lock(&self.count);
        *count += n;
    }

    /// Lowers the counter by `n`, releasing all waiters when it hits zero.
    ///
    /// # Panics
    ///
    /// Counting below zero is a caller bug and panics: every `count_down`
    /// must be matched by prior initial count or [`post`](Self::post).
    pub fn count_down(&self, n: usize) {
        let mut count = lock(&self.count);
        assert!(
            n <= *count,
            "latch counted down by {} with only {} outstanding",
            n,
            *count
        );
        *count -= n;
        if *count == 0 {
            drop(count);
            self.released.notify_all();
        }
    }

    /// Returns the counter value at some instant during the call.
    pub fn current_count(&self) -> usize {
        *lock(&self.count)
    }

    /// Blocks until the counter is zero. Returns immediately if it is.
    pub fn wait(&self) {
        let mut count = lock(&self.count);
        while *count > 0 {
            count = self
                .released
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the counter is zero or `patience` has elapsed.
    ///
    /// Returns `true` if zero was observed, `false` on timeout. The
    /// deadline is monotonic.
    pub fn wait_for(&self, patience: Duration) -> bool {
        let deadline = Instant::now() + patience;
        let mut count = lock(&self.count);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .released
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        true
    }
}

impl Default for Latch {
    /// An unarmed latch: waiters pass until the first `post`.
    fn default() -> Self {
        Self::new(0)
    }
}
