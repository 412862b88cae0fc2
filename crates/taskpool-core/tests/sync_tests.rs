//! Timing-sensitive integration tests for the wait primitives.
//!
//! The tolerances are generous (whole milliseconds of slack) so the suite
//! stays green on loaded CI machines while still pinning down the
//! contracts: timed waits respect their deadline, releases actually
//! release, and permits are consumed exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskpool_core::sync::{Gate, Latch, Semaphore};

#[test]
fn gate_blocks_then_releases_on_open() {
    let gate = Arc::new(Gate::new(false));
    let has_passed = Arc::new(AtomicBool::new(false));

    let waiter = {
        let gate = Arc::clone(&gate);
        let has_passed = Arc::clone(&has_passed);
        thread::spawn(move || {
            gate.wait();
            has_passed.store(true, Ordering::Release);
        })
    };

    // The waiter must still be blocked while the gate is closed.
    thread::sleep(Duration::from_millis(25));
    assert!(!has_passed.load(Ordering::Acquire));

    gate.open();
    waiter.join().unwrap();
    assert!(has_passed.load(Ordering::Acquire));
}

#[test]
fn gate_timed_wait_honors_deadline() {
    let gate = Gate::new(false);

    let begun = Instant::now();
    assert!(!gate.wait_for(Duration::from_millis(50)));
    let elapsed = begun.elapsed();

    assert!(elapsed >= Duration::from_millis(50));
    assert!(
        elapsed < Duration::from_millis(500),
        "timed wait overshot grossly: {:?}",
        elapsed
    );
}

#[test]
fn latch_two_step_release() {
    let latch = Arc::new(Latch::new(2));

    let waiter = {
        let latch = Arc::clone(&latch);
        thread::spawn(move || latch.wait_for(Duration::from_secs(5)))
    };

    // One count-down of two leaves the waiter blocked.
    latch.count_down(1);
    thread::sleep(Duration::from_millis(25));
    assert_eq!(latch.current_count(), 1);

    latch.count_down(1);
    assert!(waiter.join().unwrap());
}

#[test]
fn latch_late_waiters_pass_after_release() {
    let latch = Latch::new(1);
    latch.count_down(1);

    // A waiter arriving after the release must not block at all.
    let begun = Instant::now();
    latch.wait();
    assert!(begun.elapsed() < Duration::from_millis(50));
}

#[test]
fn latch_releases_all_pending_waiters() {
    let latch = Arc::new(Latch::new(1));
    let mut waiters = Vec::new();

    for _ in 0..4 {
        let latch = Arc::clone(&latch);
        waiters.push(thread::spawn(move || latch.wait_for(Duration::from_secs(5))));
    }

    thread::sleep(Duration::from_millis(10));
    latch.count_down(1);
    for waiter in waiters {
        assert!(waiter.join().unwrap());
    }
}

#[test]
fn semaphore_timed_wait_returns_within_deadline() {
    let semaphore = Semaphore::new(0);

    let patience = Duration::from_millis(50);
    let begun = Instant::now();
    assert!(!semaphore.wait_for_then_decrement(patience));
    let elapsed = begun.elapsed();

    assert!(elapsed >= patience);
    assert!(
        elapsed < patience + Duration::from_millis(450),
        "timed wait overshot grossly: {:?}",
        elapsed
    );
}

#[test]
fn semaphore_success_decrements_exactly_once() {
    let semaphore = Semaphore::new(1);
    assert!(semaphore.wait_for_then_decrement(Duration::from_millis(100)));
    assert_eq!(semaphore.current_permits(), 0);
}

#[test]
fn semaphore_permits_cross_threads() {
    const WAITERS: usize = 3;

    let semaphore = Arc::new(Semaphore::new(0));
    let mut waiters = Vec::new();

    for _ in 0..WAITERS {
        let semaphore = Arc::clone(&semaphore);
        waiters.push(thread::spawn(move || {
            semaphore.wait_for_then_decrement(Duration::from_secs(5))
        }));
    }

    thread::sleep(Duration::from_millis(10));
    for _ in 0..WAITERS {
        semaphore.post(1);
    }

    for waiter in waiters {
        assert!(waiter.join().unwrap());
    }
    assert_eq!(semaphore.current_permits(), 0);
}

#[test]
fn monotonic_sleep_holds_its_duration() {
    let requested = Duration::from_millis(30);
    let begun = Instant::now();
    taskpool_core::thread::sleep(requested);
    assert!(begun.elapsed() >= requested);
}
