use crate::error::TaskError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Locks a mutex, shrugging off poisoning; the critical sections here
/// only move a value in or out, so a poisoned lock is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What became of the task.
enum Outcome<T> {
    Value(T),
    Panicked(String),
    Broken,
}

struct Shared<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    resolved: Condvar,
}

/// Creates a connected completer/handle pair.
pub(crate) fn channel<T>() -> (Completer<T>, CompletionHandle<T>) {
    let shared = Arc::new(Shared {
        outcome: Mutex::new(None),
        resolved: Condvar::new(),
    });
    (
        Completer {
            shared: Arc::clone(&shared),
            resolved: false,
        },
        CompletionHandle { shared },
    )
}

/// The sending half, owned by the scheduled task.
///
/// Exactly one outcome is ever recorded. If the completer is dropped
/// without recording one (the task was destroyed instead of invoked), the
/// handle resolves to [`TaskError::BrokenPromise`].
pub(crate) struct Completer<T> {
    shared: Arc<Shared<T>>,
    resolved: bool,
}

impl<T> Completer<T> {
    /// Records the task's return value.
    pub(crate) fn set_value(mut self, value: T) {
        self.resolve(Outcome::Value(value));
    }

    /// Records that the task panicked, preserving the panic message.
    pub(crate) fn set_panicked(mut self, message: String) {
        self.resolve(Outcome::Panicked(message));
    }

    fn resolve(&mut self, outcome: Outcome<T>) {
        let mut slot = lock(&self.shared.outcome);
        if slot.is_none() {
            *slot = Some(outcome);
        }
        drop(slot);
        self.resolved = true;
        self.shared.resolved.notify_all();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if !self.resolved {
            self.resolve(Outcome::Broken);
        }
    }
}

/// The receiving half of a scheduled task, returned by
/// [`ThreadPool::schedule`](crate::ThreadPool::schedule).
///
/// A one-shot channel: it resolves exactly once, to the task's return
/// value, to the panic the task raised, or to
/// [`TaskError::BrokenPromise`] when the pool shut down before the task
/// ran. Dropping the handle is fine; the task still runs.
pub struct CompletionHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> CompletionHandle<T> {
    /// Blocks until the task resolves and returns its outcome.
    pub fn get(self) -> Result<T, TaskError> {
        let mut slot = lock(&self.shared.outcome);
        loop {
            if let Some(outcome) = slot.take() {
                return Self::unpack(outcome);
            }
            slot = self
                .shared
                .resolved
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Takes the outcome if the task has already resolved.
    ///
    /// Returns `None` while the task is still pending or running. After
    /// the outcome has been taken once, later calls return `None` again.
    pub fn try_take(&mut self) -> Option<Result<T, TaskError>> {
        lock(&self.shared.outcome).take().map(Self::unpack)
    }

    /// Blocks until the task resolves or `patience` elapses.
    ///
    /// Returns `true` once an outcome is available for
    /// [`get`](Self::get) or [`try_take`](Self::try_take). The deadline
    /// is monotonic.
    pub fn wait_for(&self, patience: Duration) -> bool {
        let deadline = Instant::now() + patience;
        let mut slot = lock(&self.shared.outcome);
        while slot.is_none() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = self
                .shared
                .resolved
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        true
    }

    /// Returns `true` if an outcome has been recorded.
    pub fn is_resolved(&self) -> bool {
        lock(&self.shared.outcome).is_some()
    }

    fn unpack(outcome: Outcome<T>) -> Result<T, TaskError> {
        match outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Panicked(message) => Err(TaskError::Panicked(message)),
            Outcome::Broken => Err(TaskError::BrokenPromise),
        }
    }
}
