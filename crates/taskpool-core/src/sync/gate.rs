use crate::sync::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Lets threads through only while it is open.
///
/// The simplest of the wait primitives: while the gate is closed every
/// [`wait`](Self::wait) blocks, and a single [`open`](Self::open) releases
/// all of them at once. Closing the gate again only affects future
/// waiters; threads that already passed are not called back. Windows and
/// .NET developers know this shape as a manual-reset event.
///
/// A wait that returns normally observed the gate open during that call;
/// there is no spurious passthrough.
pub struct Gate {
    /// Mirror of the state for the lock-free fast path. Written only
    /// while `state` is held, so fast-path readers can trust it.
    is_open: AtomicBool,
    state: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    /// Creates a gate in the given initial state.
    pub fn new(initially_open: bool) -> Self {
        Self {
            is_open: AtomicBool::new(initially_open),
            state: Mutex::new(initially_open),
            opened: Condvar::new(),
        }
    }

    /// Opens the gate, releasing all current waiters and letting future
    /// ones pass immediately.
    pub fn open(&self) {
        let mut open = lock(&self.state);
        *open = true;
        self.is_open.store(true, Ordering::Release);
        drop(open);
        self.opened.notify_all();
    }

    /// Closes the gate; future waiters block until the next `open`.
    pub fn close(&self) {
        let mut open = lock(&self.state);
        *open = false;
        self.is_open.store(false, Ordering::Release);
    }

    /// Sets the gate to open (`true`) or closed (`false`).
    pub fn set(&self, opened: bool) {
        if opened {
            self.open();
        } else {
            self.close();
        }
    }

    /// Returns the state at some instant during the call.
    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// Blocks until the gate is open. Returns immediately if it already is.
    pub fn wait(&self) {
        // Fast path: no lock traffic when the gate is already open.
        if self.is_open.load(Ordering::Acquire) {
            return;
        }
        let mut open = lock(&self.state);
        while !*open {
            open = self
                .opened
                .wait(open)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Blocks until the gate is open or `patience` has elapsed.
    ///
    /// Returns `true` if the gate was observed open, `false` on timeout.
    /// The deadline is monotonic; wall-clock adjustments do not affect it.
    pub fn wait_for(&self, patience: Duration) -> bool {
        if self.is_open.load(Ordering::Acquire) {
            return true;
        }

        let deadline = Instant::now() + patience;
        let mut open = lock(&self.state);
        while !*open {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .opened
                .wait_timeout(open, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            open = guard;
            // Loop re-checks both the state and the remaining time, which
            // also absorbs spurious condvar wakeups.
        }
        true
    }
}

impl Default for Gate {
    /// A gate starts closed unless stated otherwise.
    fn default() -> Self {
        Self::new(false)
    }
}
