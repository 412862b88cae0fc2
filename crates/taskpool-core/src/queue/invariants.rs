//! Debug assertion macros for the queue invariants.
//!
//! Active in debug builds only, so release builds pay nothing. Each macro
//! states the property it checks in its failure message; the queues invoke
//! them at the point where the property must hold.

/// Asserts that a ring never holds more items than it has slots.
macro_rules! debug_assert_within_capacity {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count <= $capacity,
            "queue count {} exceeds capacity {}",
            $count,
            $capacity
        )
    };
}

/// Asserts that a cursor only ever moves forward.
macro_rules! debug_assert_cursor_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} cursor moved backwards from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Asserts that the consumer never overtakes the producer.
macro_rules! debug_assert_head_within_tail {
    ($head:expr, $tail:expr) => {
        debug_assert!(
            $head <= $tail,
            "head cursor {} advanced past tail cursor {}",
            $head,
            $tail
        )
    };
}

/// Asserts that a reserved cell carries the lap sequence the protocol
/// expects at that position.
macro_rules! debug_assert_cell_lap {
    ($seq:expr, $expected:expr) => {
        debug_assert!(
            $seq == $expected,
            "cell sequence {} does not match reserved position {}",
            $seq,
            $expected
        )
    };
}

pub(crate) use debug_assert_cell_lap;
pub(crate) use debug_assert_cursor_monotonic;
pub(crate) use debug_assert_head_within_tail;
pub(crate) use debug_assert_within_capacity;
