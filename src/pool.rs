//! Connection worker pool (C6): an elastic thread pool that pulls jobs off
//! a FIFO queue, with watermark-based back-pressure and per-worker
//! idle-timeout shrinkage.
//!
//! Grounded in the teacher's `Server::build`/`spawn_worker`
//! (`examples/AmakeSashaDev-maker_web/src/server/server_impl.rs`), which
//! pre-spawns a fixed number of workers pulling off a `SegQueue` — this
//! version keeps the queue-of-jobs shape but makes the worker count
//! elastic between `minthreads` and `maxthreads` per
//! [`crate::config::ConnPoolConfig`], matching
//! `examples/other_examples/0abdc3de_saworbit-orbit__crates-core-resilience-src-connection_pool.rs.rs`'s
//! idle/lifetime bookkeeping ported from async tasks to blocking threads.

use crate::config::{ConnPoolConfig, RequestLimits};
use crate::driver::Sock;
use crate::sync::{self, Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// One in-flight request/connection, queued onto a [`ConnPool`] and handed
/// to a worker (spec.md §4.6's "Conn"). Carries the lifecycle timestamps
/// and the per-request limits matched against it once its method/URL are
/// known, so the worker can both enforce and report against them.
///
/// Grounded in `Ns_Conn`'s four timestamps (`acceptTime`,
/// `requestQueueTime`, `requestDequeueTime`, `filterDoneTime`) from
/// `examples/original_source/nsd/queue.c`; unlike the original, this
/// version resets `dequeue_time`/`filter_done_time` on every keep-alive
/// iteration of the same connection, since only the very first request on
/// a socket actually passes through the pool's wait queue — later ones
/// are served directly out of the worker's own loop (see `server.rs`'s
/// `handle_connection`), so their `queue_time` span is effectively zero.
pub struct Conn {
    pub sock: Sock,
    pub id: u64,
    pub accept_time: Instant,
    pub queue_time: Option<Instant>,
    pub dequeue_time: Option<Instant>,
    pub filter_done_time: Option<Instant>,
    pub limits: RequestLimits,
}

impl Conn {
    /// Wraps a freshly accepted `Sock`, stamping `accept_time` now —
    /// called from the driver's accept/read-ahead loop once a full header
    /// block has arrived, before the connection is handed to the pool.
    pub fn new(sock: Sock) -> Self {
        Self {
            sock,
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            accept_time: Instant::now(),
            queue_time: None,
            dequeue_time: None,
            filter_done_time: None,
            limits: RequestLimits::default(),
        }
    }

    /// Stamps `queue_time` — called right before [`ConnPool::dispatch`].
    pub fn mark_queued(&mut self) {
        self.queue_time = Some(Instant::now());
    }

    /// Stamps `filter_done_time` — called once the pre-auth/post-auth
    /// filter chain has run and the handler is about to execute.
    pub fn mark_filter_done(&mut self) {
        self.filter_done_time = Some(Instant::now());
    }
}

/// Aggregated pool-level timers accumulated across completed requests
/// (spec.md §4.6): the accept-to-queue span, the queue-to-dequeue span,
/// the dequeue-to-filter-done span, and the filter-done-to-finish span.
/// Stored as nanosecond sums plus a count so callers can derive averages;
/// kept separate from [`ConnPool`] itself since the pool's own elastic
/// worker mechanics are generic over the job type, while this accounting
/// is specific to [`Conn`].
#[derive(Default)]
pub struct ConnTimings {
    accept_nanos: AtomicU64,
    queue_nanos: AtomicU64,
    filter_nanos: AtomicU64,
    run_nanos: AtomicU64,
    completed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnTimingsSnapshot {
    pub completed: u64,
    pub mean_accept: Duration,
    pub mean_queue: Duration,
    pub mean_filter: Duration,
    pub mean_run: Duration,
}

impl ConnTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the four spans for one finished request: `accept_time` to
    /// `queue_time`, `queue_time` to `dequeue_time`, `dequeue_time` to
    /// `filter_done_time`, and `filter_done_time` to `finished_at`. Any
    /// timestamp `conn` never had (e.g. no filters ran before an error
    /// response) contributes a zero span rather than panicking.
    pub fn record(&self, conn: &Conn, finished_at: Instant) {
        let queue_time = conn.queue_time.unwrap_or(conn.accept_time);
        let dequeue_time = conn.dequeue_time.unwrap_or(queue_time);
        let filter_done_time = conn.filter_done_time.unwrap_or(dequeue_time);

        self.accept_nanos
            .fetch_add(queue_time.saturating_duration_since(conn.accept_time).as_nanos() as u64, Ordering::Relaxed);
        self.queue_nanos
            .fetch_add(dequeue_time.saturating_duration_since(queue_time).as_nanos() as u64, Ordering::Relaxed);
        self.filter_nanos.fetch_add(
            filter_done_time.saturating_duration_since(dequeue_time).as_nanos() as u64,
            Ordering::Relaxed,
        );
        self.run_nanos
            .fetch_add(finished_at.saturating_duration_since(filter_done_time).as_nanos() as u64, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnTimingsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let mean = |total: &AtomicU64| {
            if completed == 0 {
                Duration::ZERO
            } else {
                Duration::from_nanos(total.load(Ordering::Relaxed) / completed)
            }
        };
        ConnTimingsSnapshot {
            completed,
            mean_accept: mean(&self.accept_nanos),
            mean_queue: mean(&self.queue_nanos),
            mean_filter: mean(&self.filter_nanos),
            mean_run: mean(&self.run_nanos),
        }
    }
}

/// A worker's lifecycle, tracked only for observability (`stats()`); the
/// control flow itself lives in `run_worker`'s loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Warmup,
    Idle,
    Busy,
    Dead,
}

struct Inner<J> {
    queue: VecDeque<J>,
    num_threads: usize,
    num_idle: usize,
}

/// An elastic pool of worker threads draining a FIFO job queue.
pub struct ConnPool<J: Send + 'static> {
    name: &'static str,
    config: ConnPoolConfig,
    state: Mutex<Inner<J>>,
    not_empty: Condvar,
    not_full: Condvar,
    shutdown: std::sync::atomic::AtomicBool,
    total_dispatched: AtomicUsize,
    total_rejected: AtomicUsize,
    handler: Arc<dyn Fn(J, WorkerSlot) + Send + Sync>,
}

/// Handle passed to the job handler so it can report its own state
/// transitions (e.g. a driver handing off a long-lived streaming send).
/// Currently unused by callers but kept so the worker loop and the job
/// handler share one vocabulary for state, per the state machine in
/// `SPEC_FULL.md` §4.6.
#[derive(Clone)]
pub struct WorkerSlot {
    state: Arc<std::sync::atomic::AtomicU8>,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: Arc::new(std::sync::atomic::AtomicU8::new(WorkerState::Warmup as u8)),
        }
    }

    pub fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub num_threads: usize,
    pub num_idle: usize,
    pub queue_depth: usize,
    pub total_dispatched: usize,
    pub total_rejected: usize,
}

impl<J: Send + 'static> ConnPool<J> {
    pub fn new(
        name: &'static str,
        config: ConnPoolConfig,
        handler: impl Fn(J, WorkerSlot) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            name,
            config,
            state: Mutex::new(
                name,
                Inner {
                    queue: VecDeque::new(),
                    num_threads: 0,
                    num_idle: 0,
                },
            ),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            shutdown: std::sync::atomic::AtomicBool::new(false),
            total_dispatched: AtomicUsize::new(0),
            total_rejected: AtomicUsize::new(0),
            handler: Arc::new(handler),
        });

        for _ in 0..pool.config.minthreads {
            pool.spawn_worker(true);
        }
        pool
    }

    /// Submits a job. Returns `Err(job)` if the queue is already at the
    /// high watermark and every thread up to `maxthreads` is busy — the
    /// caller (the driver) should turn this into a 503 rather than block
    /// the accept loop.
    pub fn dispatch(self: &Arc<Self>, job: J) -> Result<(), J> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(job);
        }

        let mut guard = self.state.lock();
        if guard.queue.len() >= self.config.highwatermark {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(job);
        }

        guard.queue.push_back(job);
        let can_grow =
            guard.num_idle == 0 && guard.num_threads < self.config.maxthreads;
        drop(guard);

        self.total_dispatched.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();

        // Spawn immediately when no free worker is waiting and we're under
        // maxthreads — lowwatermark/highwatermark are back-pressure
        // thresholds for queue admission, not a growth gate.
        if can_grow {
            self.spawn_worker(false);
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, core: bool) {
        let mut guard = self.state.lock();
        guard.num_threads += 1;
        drop(guard);

        let pool = Arc::clone(self);
        sync::spawn_named(pool.name, 0, move || pool.run_worker(core));
    }

    fn run_worker(self: Arc<Self>, core: bool) {
        let slot = WorkerSlot::new();
        let handler = Arc::clone(&self.handler);

        loop {
            let job = {
                let mut guard = self.state.lock();
                loop {
                    if let Some(job) = guard.queue.pop_front() {
                        break Some(job);
                    }
                    if self.shutdown.load(Ordering::Acquire) {
                        break None;
                    }

                    guard.num_idle += 1;
                    slot.set(WorkerState::Idle);

                    let deadline = match core {
                        true => None,
                        false => Some(Instant::now() + self.config.threadtimeout()),
                    };
                    let result = match deadline {
                        Some(deadline) => {
                            Some(self.not_empty.timed_wait(&mut guard, deadline))
                        }
                        None => {
                            self.not_empty.wait(&mut guard);
                            None
                        }
                    };
                    guard.num_idle -= 1;

                    if matches!(result, Some(sync::WaitResult::Timeout)) && guard.queue.is_empty()
                    {
                        guard.num_threads -= 1;
                        slot.set(WorkerState::Dead);
                        return;
                    }
                }
            };

            let Some(job) = job else {
                let mut guard = self.state.lock();
                guard.num_threads -= 1;
                slot.set(WorkerState::Dead);
                return;
            };

            slot.set(WorkerState::Busy);
            self.not_full.notify_one();

            let handler = Arc::clone(&handler);
            let slot_for_job = slot.clone();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(job, slot_for_job);
            }));
            if outcome.is_err() {
                tracing::error!(pool = self.name, "job handler panicked; worker recovering");
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    pub fn stats(&self) -> PoolStats {
        let guard = self.state.lock();
        PoolStats {
            num_threads: guard.num_threads,
            num_idle: guard.num_idle,
            queue_depth: guard.queue.len(),
            total_dispatched: self.total_dispatched.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_config() -> ConnPoolConfig {
        ConnPoolConfig {
            minthreads: 2,
            maxthreads: 4,
            threadtimeout_secs: 1,
            lowwatermark: 1,
            highwatermark: 8,
        }
    }

    #[test]
    fn dispatches_jobs_to_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool: Arc<ConnPool<usize>> = ConnPool::new("test", test_config(), move |job, _| {
            c.fetch_add(job, Ordering::SeqCst);
        });

        for i in 1..=5 {
            pool.dispatch(i).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 15 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 15);
        pool.shutdown();
    }

    #[test]
    fn rejects_beyond_high_watermark() {
        let pool: Arc<ConnPool<usize>> = ConnPool::new(
            "test-backpressure",
            ConnPoolConfig {
                minthreads: 0,
                maxthreads: 0,
                threadtimeout_secs: 1,
                lowwatermark: 0,
                highwatermark: 1,
            },
            |_job, _slot| {
                std::thread::sleep(Duration::from_millis(200));
            },
        );

        assert!(pool.dispatch(1).is_ok());
        assert!(pool.dispatch(2).is_err());
        pool.shutdown();
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let pool: Arc<ConnPool<usize>> = ConnPool::new("test-panic", test_config(), move |job, _| {
            if job == 1 {
                panic!("boom");
            }
            c.fetch_add(1, Ordering::SeqCst);
        });

        pool.dispatch(1).unwrap();
        pool.dispatch(2).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn conn_timings_accumulate_across_requests() {
        let timings = ConnTimings::new();
        let t0 = Instant::now();
        let mut conn = Conn {
            sock: crate::driver::Sock::test_sock(),
            id: 1,
            accept_time: t0,
            queue_time: Some(t0 + Duration::from_millis(1)),
            dequeue_time: Some(t0 + Duration::from_millis(3)),
            filter_done_time: Some(t0 + Duration::from_millis(4)),
            limits: RequestLimits::default(),
        };
        timings.record(&conn, t0 + Duration::from_millis(10));

        conn.queue_time = Some(t0 + Duration::from_millis(1));
        timings.record(&conn, t0 + Duration::from_millis(10));

        let snap = timings.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.mean_accept, Duration::from_millis(1));
        assert_eq!(snap.mean_run, Duration::from_millis(6));
    }

    #[test]
    fn conn_timings_tolerates_missing_timestamps() {
        let timings = ConnTimings::new();
        let t0 = Instant::now();
        let conn = Conn {
            sock: crate::driver::Sock::test_sock(),
            id: 1,
            accept_time: t0,
            queue_time: None,
            dequeue_time: None,
            filter_done_time: None,
            limits: RequestLimits::default(),
        };
        timings.record(&conn, t0 + Duration::from_millis(5));
        let snap = timings.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.mean_accept, Duration::ZERO);
        assert_eq!(snap.mean_run, Duration::from_millis(5));
    }
}
