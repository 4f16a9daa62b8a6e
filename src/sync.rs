//! Primitive synchronization layer (C1).
//!
//! A thin layer over [`parking_lot`] that adds the two things the design
//! requires beyond a bare mutex/condvar: named, wait-time-instrumented
//! mutexes, and an absolute-deadline `timed_wait` on the condvar. Primitive
//! failures (a poisoned internal invariant, a thread that can't be spawned)
//! are not recoverable — see [`fatal`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A mutex that records contended-lock statistics, matching
/// `Ns_MutexLock`'s "measure total and max waiting time... only the slow
/// path updates stats" contract.
pub struct Mutex<T> {
    name: &'static str,
    inner: parking_lot::Mutex<T>,
    stats: MutexStats,
}

#[derive(Default)]
struct MutexStats {
    nlock: AtomicUsize,
    nbusy: AtomicUsize,
    total_waiting_ns: AtomicU64,
    max_waiting_ns: AtomicU64,
}

/// Point-in-time snapshot of a mutex's contention counters.
#[derive(Debug, Clone, Copy)]
pub struct MutexSnapshot {
    pub name: &'static str,
    pub nlock: usize,
    pub nbusy: usize,
    pub total_waiting: Duration,
    pub max_waiting: Duration,
}

impl<T> Mutex<T> {
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            inner: parking_lot::Mutex::new(value),
            stats: MutexStats::default(),
        }
    }

    /// Blocks until the lock is acquired. Only the contended path pays for
    /// the `Instant::now()` calls.
    #[inline]
    pub fn lock(&self) -> parking_lot::MutexGuard<'_, T> {
        if let Some(guard) = self.inner.try_lock() {
            self.stats.nlock.fetch_add(1, Ordering::Relaxed);
            return guard;
        }

        let start = Instant::now();
        let guard = self.inner.lock();
        let waited = start.elapsed();

        self.stats.nbusy.fetch_add(1, Ordering::Relaxed);
        self.stats.nlock.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_waiting_ns
            .fetch_add(waited.as_nanos() as u64, Ordering::Relaxed);
        self.stats
            .max_waiting_ns
            .fetch_max(waited.as_nanos() as u64, Ordering::Relaxed);

        guard
    }

    /// Non-blocking lock attempt.
    #[inline]
    pub fn try_lock(&self) -> Option<parking_lot::MutexGuard<'_, T>> {
        let guard = self.inner.try_lock();
        if guard.is_some() {
            self.stats.nlock.fetch_add(1, Ordering::Relaxed);
        }
        guard
    }

    pub fn snapshot(&self) -> MutexSnapshot {
        MutexSnapshot {
            name: self.name,
            nlock: self.stats.nlock.load(Ordering::Relaxed),
            nbusy: self.stats.nbusy.load(Ordering::Relaxed),
            total_waiting: Duration::from_nanos(self.stats.total_waiting_ns.load(Ordering::Relaxed)),
            max_waiting: Duration::from_nanos(self.stats.max_waiting_ns.load(Ordering::Relaxed)),
        }
    }
}

/// A condition variable whose timed wait takes an absolute deadline, not a
/// relative duration, so callers recompute nothing across `EINTR`-style
/// spurious wakeups.
#[derive(Default)]
pub struct Condvar {
    inner: parking_lot::Condvar,
}

/// Result of [`Condvar::timed_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    Signalled,
    Timeout,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Condvar::new(),
        }
    }

    /// Atomically releases `guard` and suspends until signalled. Tolerates
    /// spurious wakeups transparently (the caller's `while` loop around the
    /// predicate is still expected, per the usual condvar contract).
    pub fn wait<'a, T>(
        &self,
        guard: &mut parking_lot::MutexGuard<'a, T>,
    ) {
        self.inner.wait(guard);
    }

    /// Waits until `deadline`. Returns [`WaitResult::Timeout`] once the
    /// deadline passes, even across spurious wakeups.
    pub fn timed_wait<'a, T>(
        &self,
        guard: &mut parking_lot::MutexGuard<'a, T>,
        deadline: Instant,
    ) -> WaitResult {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return WaitResult::Timeout;
            }
            let remaining = deadline - now;
            let timed_out = self.inner.wait_for(guard, remaining).timed_out();
            if !timed_out {
                return WaitResult::Signalled;
            }
            if Instant::now() >= deadline {
                return WaitResult::Timeout;
            }
            // Spurious wakeup reported as timeout by parking_lot's
            // wait_for: loop and re-check the real deadline.
        }
    }

    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

/// Spawns a named thread with the given stack size. Mirrors
/// `Ns_ThreadCreate`'s `(stacksize, fn, arg) -> handle` contract.
pub fn spawn_named<F, T>(name: impl Into<String>, stack_size: usize, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .stack_size(stack_size)
        .spawn(f)
        .unwrap_or_else(|e| fatal(&format!("thread spawn failed: {e}")))
}

/// The one sanctioned abort path: primitive failures (mutex poisoning,
/// thread spawn, fatal `poll` errors) are unrecoverable by design.
#[cold]
#[track_caller]
pub fn fatal(msg: &str) -> ! {
    tracing::error!(location = %std::panic::Location::caller(), "fatal primitive failure: {msg}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_lock_has_zero_busy() {
        let m = Mutex::new("test", 0);
        {
            let mut g = m.lock();
            *g += 1;
        }
        let snap = m.snapshot();
        assert_eq!(snap.nlock, 1);
        assert_eq!(snap.nbusy, 0);
    }

    #[test]
    fn timed_wait_respects_absolute_deadline() {
        let m = Mutex::new("cv-test", ());
        let cv = Condvar::new();
        let mut guard = m.lock();
        let deadline = Instant::now() + Duration::from_millis(20);
        let result = cv.timed_wait(&mut guard, deadline);
        assert_eq!(result, WaitResult::Timeout);
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn notify_wakes_waiter() {
        use std::sync::Arc;
        let m = Arc::new(Mutex::new("notify-test", false));
        let cv = Arc::new(Condvar::new());

        let m2 = m.clone();
        let cv2 = cv.clone();
        let handle = spawn_named("waiter", 64 * 1024, move || {
            let mut guard = m2.lock();
            let deadline = Instant::now() + Duration::from_secs(5);
            while !*guard {
                if cv2.timed_wait(&mut guard, deadline) == WaitResult::Timeout {
                    break;
                }
            }
            *guard
        });

        std::thread::sleep(Duration::from_millis(10));
        {
            let mut guard = m.lock();
            *guard = true;
        }
        cv.notify_one();

        assert!(handle.join().unwrap());
    }
}
