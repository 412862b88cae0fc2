use std::fmt;
use thiserror::Error;

/// Error kinds reported by queue operations.
///
/// Timed waits on the primitives in [`crate::sync`] report timeouts through
/// their `bool` return value instead; only the queues have distinguishable
/// failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A bounded queue has no free slot left.
    #[error("queue is full")]
    Full,
    /// The queue holds no value.
    #[error("queue is empty")]
    Empty,
    /// An unbounded queue failed to allocate its next storage block.
    #[error("out of memory while extending the queue")]
    OutOfMemory,
}

/// A rejected `try_append`, handing the value back to the caller.
///
/// Modeled after the standard channel send errors: the value is returned
/// unchanged so the caller can retry or dispose of it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum AppendError<T> {
    /// The bounded queue was full; no slot was modified.
    Full(T),
    /// Block allocation failed in an unbounded queue; nothing was enqueued.
    OutOfMemory(T),
}

impl<T> AppendError<T> {
    /// Recovers the value that could not be appended.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::OutOfMemory(value) => value,
        }
    }

    /// The error kind, without the carried value.
    pub fn kind(&self) -> QueueError {
        match self {
            Self::Full(_) => QueueError::Full,
            Self::OutOfMemory(_) => QueueError::OutOfMemory,
        }
    }

    /// Returns `true` if a later retry may succeed (consumers drain the queue).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

// Manual Debug/Display so the carried value needs no trait bounds,
// same treatment as std::sync::mpsc::SendError.
impl<T> fmt::Debug for AppendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::OutOfMemory(_) => f.write_str("OutOfMemory(..)"),
        }
    }
}

impl<T> fmt::Display for AppendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}

impl<T> std::error::Error for AppendError<T> {}

/// Errors from the thread utility functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// The platform or hardware rejected the requested CPU mask.
    #[error("cpu affinity is not supported for this platform or mask")]
    AffinityNotSupported,
    /// The current affinity mask could not be read back.
    #[error("failed to query the cpu affinity mask")]
    AffinityQueryFailed,
}
