//! Thread utilities: monotonic sleep, thread identity, pool membership
//! and CPU affinity masks.
//!
//! Everything here is free functions plus two small value types; there is
//! no thread handle. Affinity control talks to the OS scheduler directly
//! and is only available on Linux; other platforms report
//! [`ThreadError::AffinityNotSupported`] so callers can fall back to the
//! all-cores mask.

use crate::error::ThreadError;
use std::cell::Cell;
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

// -----------------------------------------------------------------------------
// SLEEP
// -----------------------------------------------------------------------------

/// Suspends the calling thread for at least `duration` of monotonic time.
///
/// The OS may wake a sleeping thread early (signals, spurious wakeups) and
/// some platforms time sleeps against the adjustable wall clock. This
/// function re-sleeps until an [`Instant`] deadline has truly passed, so
/// it never returns early and clock adjustments during the call have no
/// effect.
pub fn sleep(duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep(deadline - now);
    }
}

// -----------------------------------------------------------------------------
// THREAD IDENTITY
// -----------------------------------------------------------------------------

/// Opaque identifier, unique among all threads that ran in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);

/// Returns the identifier of the calling thread.
///
/// On Linux this is the kernel task id, which is also what debuggers and
/// `/proc` display. Elsewhere it is a process-local counter; either way
/// no two live threads share a value.
pub fn current_thread_id() -> ThreadId {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: gettid has no preconditions and cannot fail.
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        ThreadId(tid as u64)
    }
    #[cfg(not(target_os = "linux"))]
    {
        use std::sync::atomic::{AtomicU64, Ordering};

        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        thread_local! {
            static THIS_THREAD: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        }
        ThreadId(THIS_THREAD.with(|id| *id))
    }
}

// -----------------------------------------------------------------------------
// POOL MEMBERSHIP
// -----------------------------------------------------------------------------

thread_local! {
    /// Set while the thread runs inside a thread pool worker loop.
    static IS_POOL_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` if the calling thread is a thread pool worker.
///
/// Useful to refuse blocking waits on pool threads, where parking a worker
/// can starve the pool.
pub fn belongs_to_thread_pool() -> bool {
    IS_POOL_WORKER.with(Cell::get)
}

/// Marks the calling thread as a pool worker for the guard's lifetime.
///
/// Thread pool implementations create one of these on worker entry; user
/// code normally only ever asks [`belongs_to_thread_pool`]. The flag is
/// cleared when the guard drops, so a thread that outlives its worker role
/// reports correctly again.
pub struct PoolWorkerScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl PoolWorkerScope {
    /// Sets the membership flag for the calling thread.
    pub fn enter() -> Self {
        IS_POOL_WORKER.with(|flag| flag.set(true));
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for PoolWorkerScope {
    fn drop(&mut self) {
        IS_POOL_WORKER.with(|flag| flag.set(false));
    }
}

impl fmt::Debug for PoolWorkerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PoolWorkerScope")
    }
}

// -----------------------------------------------------------------------------
// CPU AFFINITY
// -----------------------------------------------------------------------------

/// Bit mask over logical CPUs: bit `n` set means the thread may run on
/// CPU `n`.
///
/// The mask is 64 bits wide. On machines with more logical CPUs than
/// that, queries whose affinity extends past CPU 63 collapse to
/// [`CpuMask::ALL`], the "any core" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMask(pub u64);

impl CpuMask {
    /// The thread may run on every logical CPU.
    pub const ALL: CpuMask = CpuMask(u64::MAX);

    /// A mask naming a single CPU.
    pub fn single(cpu: u32) -> Self {
        assert!(cpu < 64, "cpu index {} outside the 64-bit mask", cpu);
        Self(1 << cpu)
    }

    /// Returns `true` if the mask allows CPU `cpu`.
    pub fn contains(&self, cpu: u32) -> bool {
        cpu < 64 && self.0 & (1 << cpu) != 0
    }

    /// Number of CPUs the mask allows.
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }
}

/// Reads the calling thread's CPU affinity mask.
#[cfg(target_os = "linux")]
pub fn affinity_mask() -> Result<CpuMask, ThreadError> {
    // SAFETY: cpu_set_t is a plain bit set; all-zero is a valid value.
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    // SAFETY: pid 0 addresses the calling thread and `set` outlives the call.
    let rc = unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) };
    if rc != 0 {
        return Err(ThreadError::AffinityQueryFailed);
    }

    let mut mask = 0u64;
    for cpu in 0..64 {
        // SAFETY: cpu is within the fixed cpu_set_t range.
        if unsafe { libc::CPU_ISSET(cpu, &set) } {
            mask |= 1 << cpu;
        }
    }
    // Affinity beyond the mask width cannot be represented; report the
    // all-cores sentinel instead of silently truncating.
    for cpu in 64..libc::CPU_SETSIZE as usize {
        // SAFETY: cpu is within the fixed cpu_set_t range.
        if unsafe { libc::CPU_ISSET(cpu, &set) } {
            return Ok(CpuMask::ALL);
        }
    }
    Ok(CpuMask(mask))
}

/// Reads the calling thread's CPU affinity mask.
#[cfg(not(target_os = "linux"))]
pub fn affinity_mask() -> Result<CpuMask, ThreadError> {
    Err(ThreadError::AffinityNotSupported)
}

/// Restricts the calling thread to the CPUs named in `mask`.
///
/// An empty mask, or one naming only CPUs the system does not have, is
/// rejected by the scheduler and reported as
/// [`ThreadError::AffinityNotSupported`].
#[cfg(target_os = "linux")]
pub fn set_affinity_mask(mask: CpuMask) -> Result<(), ThreadError> {
    // SAFETY: cpu_set_t is a plain bit set; all-zero is a valid value.
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    for cpu in 0..64 {
        if mask.contains(cpu) {
            // SAFETY: cpu is within the fixed cpu_set_t range.
            unsafe { libc::CPU_SET(cpu as usize, &mut set) };
        }
    }

    // SAFETY: pid 0 addresses the calling thread and `set` outlives the call.
    let rc = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
    if rc != 0 {
        return Err(ThreadError::AffinityNotSupported);
    }
    Ok(())
}

/// Restricts the calling thread to the CPUs named in `mask`.
#[cfg(not(target_os = "linux"))]
pub fn set_affinity_mask(_mask: CpuMask) -> Result<(), ThreadError> {
    Err(ThreadError::AffinityNotSupported)
}
