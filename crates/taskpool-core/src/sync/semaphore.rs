use crate::sync::lock;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Counting semaphore with monotonic timed waits.
///
/// [`post`](Self::post) adds permits,
/// [`wait_then_decrement`](Self::wait_then_decrement) consumes one,
/// blocking while none are available. The timed variant measures its
/// patience against
/// [`Instant`], so adjusting the wall clock during a wait neither cuts it
/// short nor stretches it; platform semaphores that time out against the
/// wall clock are exactly what this type exists to avoid.
///
/// A successful wait synchronizes-with the `post` that produced the
/// permit it consumed (the permit count travels through the mutex).
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `initial_permits`.
    pub fn new(initial_permits: usize) -> Self {
        Self {
            permits: Mutex::new(initial_permits),
            available: Condvar::new(),
        }
    }

    /// Adds `n` permits and wakes up to `n` waiters.
    pub fn post(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = lock(&self.permits);
        *permits += n;
        drop(permits);

        if n == 1 {
            self.available.notify_one();
        } else {
            // More than one permit may satisfy more than one waiter; the
            // per-waiter re-check sorts out any overshoot.
            self.available.notify_all();
        }
    }

    /// Returns the permit count at some instant during the call.
    pub fn current_permits(&self) -> usize {
        *lock(&self.permits)
    }

    /// Blocks until a permit is available, then consumes it.
    pub fn wait_then_decrement(&self) {
        let mut permits = lock(&self.permits);
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    /// Blocks until a permit is available or `patience` has elapsed.
    ///
    /// Returns `true` if a permit was consumed (exactly one), `false` on
    /// timeout with the permit count untouched.
    pub fn wait_for_then_decrement(&self, patience: Duration) -> bool {
        let deadline = Instant::now() + patience;
        let mut permits = lock(&self.permits);
        while *permits == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .available
                .wait_timeout(permits, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            permits = guard;
            // Loop re-checks the count and the remaining time, absorbing
            // spurious wakeups and permit races with other waiters.
        }
        *permits -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_permits_pass_through() {
        let semaphore = Semaphore::new(2);
        semaphore.wait_then_decrement();
        semaphore.wait_then_decrement();
        assert_eq!(semaphore.current_permits(), 0);
        assert!(!semaphore.wait_for_then_decrement(Duration::from_millis(5)));
    }

    #[test]
    fn test_post_wakes_waiter() {
        let semaphore = Arc::new(Semaphore::new(0));

        let waiter = {
            let semaphore = Arc::clone(&semaphore);
            thread::spawn(move || semaphore.wait_for_then_decrement(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(10));
        semaphore.post(1);
        assert!(waiter.join().unwrap());
        assert_eq!(semaphore.current_permits(), 0);
    }

    #[test]
    fn test_post_many_wakes_many() {
        let semaphore = Arc::new(Semaphore::new(0));
        let mut waiters = Vec::new();

        for _ in 0..3 {
            let semaphore = Arc::clone(&semaphore);
            waiters.push(thread::spawn(move || {
                semaphore.wait_for_then_decrement(Duration::from_secs(5))
            }));
        }

        thread::sleep(Duration::from_millis(10));
        semaphore.post(3);
        for waiter in waiters {
            assert!(waiter.join().unwrap());
        }
        assert_eq!(semaphore.current_permits(), 0);
    }

    #[test]
    fn test_timeout_leaves_count_untouched() {
        let semaphore = Semaphore::new(0);
        let begun = Instant::now();

        assert!(!semaphore.wait_for_then_decrement(Duration::from_millis(30)));
        assert!(begun.elapsed() >= Duration::from_millis(30));

        semaphore.post(1);
        assert_eq!(semaphore.current_permits(), 1);
    }

    #[test]
    fn test_timed_wait_consumes_exactly_one() {
        let semaphore = Semaphore::new(3);
        assert!(semaphore.wait_for_then_decrement(Duration::from_millis(50)));
        assert_eq!(semaphore.current_permits(), 2);
    }
}
