//! Integration tests for the thread pool.
//!
//! These run whole pools with real threads and cover the externally
//! visible contracts: results and panics arrive through the handle,
//! destruction cancels instead of hanging, the pool grows under backlog
//! and shrinks when idle, and worker threads know they are workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskpool::{TaskError, ThreadPool};
use taskpool_core::thread;

#[test]
fn every_scheduled_task_runs_exactly_once() {
    const TASKS: usize = 500;

    let pool = ThreadPool::new(2, 4).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let runs = Arc::clone(&runs);
            pool.schedule(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        })
        .collect();

    for handle in handles {
        handle.get().unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), TASKS);
}

#[test]
fn results_are_delivered_per_task() {
    let pool = ThreadPool::new(2, 4).unwrap();

    let handles: Vec<_> = (0..100u64)
        .map(|i| pool.schedule(move || i * i).unwrap())
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.get(), Ok((i as u64) * (i as u64)));
    }
}

#[test]
fn panic_in_one_task_does_not_poison_the_next() {
    let pool = ThreadPool::new(1, 1).unwrap();

    let bad = pool
        .schedule(|| -> () { panic!("deliberate failure") })
        .unwrap();
    let good = pool.schedule(|| "still alive").unwrap();

    assert_eq!(
        bad.get(),
        Err(TaskError::Panicked(String::from("deliberate failure")))
    );
    assert_eq!(good.get(), Ok("still alive"));
}

#[test]
fn destruction_breaks_promises_of_queued_tasks() {
    // One worker, pinned down by a sleeping task; the compute task never
    // gets a worker before the pool dies.
    let pool = ThreadPool::new(1, 1).unwrap();

    let _sleeper = pool
        .schedule(|| thread::sleep(Duration::from_millis(100)))
        .unwrap();
    let compute = pool.schedule(|| (12 * 34) - 12 - 34).unwrap();

    drop(pool);
    assert_eq!(compute.get(), Err(TaskError::BrokenPromise));
}

#[test]
fn destruction_lets_running_tasks_finish() {
    let pool = ThreadPool::new(1, 1).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    let marker = Arc::clone(&finished);
    let running = pool
        .schedule(move || {
            thread::sleep(Duration::from_millis(50));
            marker.store(1, Ordering::SeqCst);
            7
        })
        .unwrap();

    // Give the worker time to pick the task up, then destroy the pool
    // mid-execution.
    thread::sleep(Duration::from_millis(10));
    drop(pool);

    assert_eq!(running.get(), Ok(7));
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn no_handle_hangs_across_destruction() {
    // Whatever the timing, every handle resolves.
    for _ in 0..10 {
        let pool = ThreadPool::new(1, 2).unwrap();
        let handles: Vec<_> = (0..20)
            .map(|i| pool.schedule(move || i).unwrap())
            .collect();
        drop(pool);

        for handle in handles {
            // Either outcome is legal; hanging is not. wait_for bounds
            // the verdict.
            assert!(handle.wait_for(Duration::from_secs(5)));
            match handle.get() {
                Ok(_) | Err(TaskError::BrokenPromise) => {}
                Err(other) => panic!("unexpected outcome: {:?}", other),
            }
        }
    }
}

#[test]
fn pool_grows_under_backlog() {
    let pool = ThreadPool::new(1, 4).unwrap();
    assert_eq!(pool.worker_count(), 1);

    // A pile of slow tasks forces the backlog past the crew size.
    let handles: Vec<_> = (0..16)
        .map(|_| {
            pool.schedule(|| thread::sleep(Duration::from_millis(40)))
                .unwrap()
        })
        .collect();

    // Growth happens on worker heart-beats; give it a few.
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut peak = pool.worker_count();
    while Instant::now() < deadline && peak < 2 {
        thread::sleep(Duration::from_millis(10));
        peak = peak.max(pool.worker_count());
    }
    assert!(peak > 1, "pool never grew past one worker");

    for handle in handles {
        handle.get().unwrap();
    }
}

#[test]
fn pool_shrinks_back_to_minimum_when_idle() {
    let pool = ThreadPool::new(1, 4).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            pool.schedule(|| thread::sleep(Duration::from_millis(20)))
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.get().unwrap();
    }

    // Idle exit takes IDLE_SHUTDOWN_HEART_BEATS * WORKER_HEART_BEAT of
    // continuous idleness; wait out a comfortable multiple.
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && pool.worker_count() > 1 {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(pool.worker_count(), 1, "idle workers never exited");
}

#[test]
fn workers_know_they_belong_to_the_pool() {
    let pool = ThreadPool::new(1, 2).unwrap();

    let inside = pool.schedule(thread::belongs_to_thread_pool).unwrap();
    assert_eq!(inside.get(), Ok(true));
    assert!(!thread::belongs_to_thread_pool());
}

#[test]
fn scheduling_from_many_threads_is_safe() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 100;

    let pool = Arc::new(ThreadPool::new(2, 4).unwrap());
    let total = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let total = Arc::clone(&total);
            std::thread::spawn(move || {
                let handles: Vec<_> = (0..PER_THREAD)
                    .map(|_| {
                        let total = Arc::clone(&total);
                        pool.schedule(move || {
                            total.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap()
                    })
                    .collect();
                for handle in handles {
                    handle.get().unwrap();
                }
            })
        })
        .collect();

    for submitter in submitters {
        submitter.join().unwrap();
    }
    assert_eq!(total.load(Ordering::SeqCst), THREADS * PER_THREAD);
}

#[test]
fn dropped_handles_do_not_stop_the_task() {
    let pool = ThreadPool::new(1, 2).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));

    let marker = Arc::clone(&ran);
    drop(pool.schedule(move || {
        marker.store(1, Ordering::SeqCst);
    }));

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && ran.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
