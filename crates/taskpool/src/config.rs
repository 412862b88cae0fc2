//! Tuning constants and worker-count defaults.
//!
//! The constants are deliberately not configurable per pool: they encode
//! trade-offs (wake-up latency versus idle CPU burn, slot reuse versus
//! memory retention) that only make sense to change together with the
//! code that uses them.

use std::time::Duration;

/// Ceiling on the total size (header plus payload) of a task slot that
/// may re-enter the reuse pool.
///
/// Slots above the limit are freed as soon as their task finishes.
/// Without the ceiling, one occasional giant task would park its giant
/// slot in the pool, get handed out for small tasks, and over time only
/// oversized blocks would circulate.
pub(crate) const SLOT_REUSE_LIMIT: usize = 128;

/// How long an idle worker sleeps on the task semaphore before waking to
/// check for shutdown and its own idleness.
///
/// Workers with work never see this interval; scheduling wakes them
/// through the semaphore immediately.
pub(crate) const WORKER_HEART_BEAT: Duration = Duration::from_millis(50);

/// Consecutive workless heart-beats after which a worker offers to exit
/// (honored only while the pool is above its minimum size).
pub(crate) const IDLE_SHUTDOWN_HEART_BEATS: usize = 10;

/// How long pool destruction waits for the workers to come out before
/// abandoning the stragglers.
pub(crate) const SHUTDOWN_PATIENCE: Duration = Duration::from_secs(5);

/// A good minimum worker count for the machine's processor count.
///
/// A few threads are kept around for one-off tasks; the square root keeps
/// that number from exploding on many-core machines. Heavy number
/// crunching should pass an explicit minimum instead.
pub fn guess_min_workers(processor_count: usize) -> usize {
    let square_root = (processor_count as f64).sqrt().round() as usize;
    if square_root >= 4 {
        square_root // 5 for 22 cores, 6 for 32 cores, 7 for 44 cores
    } else if square_root >= 3 {
        4 // fourteen cores or less
    } else {
        2 // six cores or less
    }
}

/// A good maximum worker count for the machine's processor count.
///
/// Kept above the processor count so that when tasks finish there is
/// still runnable work for every core while user code reacts to results
/// and produces more.
pub fn guess_max_workers(processor_count: usize) -> usize {
    processor_count + guess_min_workers(processor_count)
}

/// The number of logical processors, with a floor of one.
pub(crate) fn processor_count() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_workers_clamps() {
        assert_eq!(guess_min_workers(1), 2);
        assert_eq!(guess_min_workers(4), 2);
        assert_eq!(guess_min_workers(6), 2);
        assert_eq!(guess_min_workers(8), 4);
        assert_eq!(guess_min_workers(14), 4);
        assert_eq!(guess_min_workers(22), 5);
        assert_eq!(guess_min_workers(32), 6);
    }

    #[test]
    fn test_max_workers_exceeds_processor_count() {
        for cores in [1, 2, 4, 8, 16, 64] {
            assert!(guess_max_workers(cores) > cores);
        }
    }
}
