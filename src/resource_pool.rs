//! Generic named-resource pool (C9): the same pooling machinery backs both
//! database-handle pools and job-queue worker pools in the original.
//!
//! Grounded in `examples/original_source/nsd/tcljob.c`. A pool bounds how
//! many resources of type `R` exist at once (`max_open`), keeps a bounded
//! number idle for reuse, retires resources past `max_idle_time` or
//! `max_lifetime`, and can invalidate every outstanding resource at once by
//! bumping an epoch (`stale_on_close`) — used when a backend's
//! configuration changes underneath it.
//!
//! Two condvars do the bookkeeping the original splits across its
//! "waiter" and "getter" queues: `turn` serializes waiters into roughly
//! FIFO order so the first caller to block is the first offered a freed
//! resource, and `availability` is what actually gets signalled when a
//! resource is returned or a new one is created.

use crate::error::Error;
use crate::sync::{Condvar, Mutex, WaitResult};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Tuning knobs for one pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on resources that exist at once (idle + checked out).
    pub max_open: usize,
    /// Resources idle longer than this are retired by the sweeper.
    pub max_idle_time: Duration,
    /// Resources older than this (since creation) are retired on their
    /// next return, regardless of idle time.
    pub max_lifetime: Duration,
    /// How often the background sweeper scans for idle resources to
    /// retire. `None` disables the sweeper thread entirely.
    pub sweep_interval: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 4,
            max_idle_time: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

struct Entry<R> {
    resource: R,
    created_at: Instant,
    last_used: Instant,
    epoch: u64,
}

struct Inner<R> {
    idle: VecDeque<Entry<R>>,
    num_open: usize,
    waiting: usize,
    epoch: u64,
    /// Set while one [`Pool::get`] call is assembling its batch of `n`
    /// handles, so a second concurrent batch can't interleave and end up
    /// with a partial set of its own. `turn` is the condvar threads wait on
    /// for their turn at this flag.
    batch_in_progress: bool,
}

/// A checked-out resource. Dropping it without calling [`Pool::put`] or
/// [`Pool::bounce`] bounces it automatically, so a panicking handler can
/// never leak a pool slot.
pub struct Handle<R> {
    resource: Option<R>,
    created_at: Instant,
    epoch: u64,
}

impl<R> Handle<R> {
    pub fn get(&self) -> &R {
        self.resource.as_ref().expect("resource taken")
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.resource.as_mut().expect("resource taken")
    }
}

impl<R> std::ops::Deref for Handle<R> {
    type Target = R;
    fn deref(&self) -> &R {
        self.get()
    }
}

impl<R> std::ops::DerefMut for Handle<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.get_mut()
    }
}

thread_local! {
    /// Per-thread set of pool names this thread currently holds a handle
    /// from, so `get` can refuse to self-deadlock a thread that already
    /// owns the last available slot of a pool it re-enters.
    static HELD_POOLS: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

/// A bounded pool of resources of type `R`, created on demand by a
/// factory closure.
pub struct Pool<R: Send + 'static> {
    name: &'static str,
    config: PoolConfig,
    factory: Box<dyn Fn() -> Result<R, Error> + Send + Sync>,
    inner: Mutex<Inner<R>>,
    turn: Condvar,
    availability: Condvar,
}

impl<R: Send + 'static> Pool<R> {
    pub fn new(
        name: &'static str,
        config: PoolConfig,
        factory: impl Fn() -> Result<R, Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            config,
            factory: Box::new(factory),
            inner: Mutex::new(
                name,
                Inner {
                    idle: VecDeque::new(),
                    num_open: 0,
                    waiting: 0,
                    epoch: 0,
                    batch_in_progress: false,
                },
            ),
            turn: Condvar::new(),
            availability: Condvar::new(),
        }
    }

    /// Invalidates every resource currently outstanding or idle: idle
    /// resources are dropped immediately, checked-out ones are dropped
    /// instead of recycled the next time they're returned.
    pub fn bump_epoch(&self) {
        let mut guard = self.inner.lock();
        guard.epoch += 1;
        let stale_epoch = guard.epoch;
        let before = guard.idle.len();
        guard.idle.retain(|e| e.epoch == stale_epoch);
        guard.num_open -= before - guard.idle.len();
    }

    fn is_stale(&self, entry: &Entry<R>, current_epoch: u64, now: Instant) -> bool {
        entry.epoch != current_epoch
            || now.duration_since(entry.last_used) > self.config.max_idle_time
            || now.duration_since(entry.created_at) > self.config.max_lifetime
    }

    /// Atomically acquires `n` handles from the pool, blocking until all
    /// `n` are available (idle reuse and/or fresh creation) or `deadline`
    /// passes. `n > max_open` fails immediately with
    /// `Error::BackendUnavailable`, never `Error::Timeout` — no wait could
    /// ever satisfy it. Composite acquisitions are serialized one at a time
    /// via `turn` (the "waiter" condvar) so two callers can never end up
    /// with an interleaved, partial batch each; `availability` (the
    /// "getter" condvar) is what a release path signals to wake whichever
    /// batch is currently assembling.
    pub fn get(&self, n: usize, deadline: Instant) -> Result<Vec<Handle<R>>, Error> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if n > self.config.max_open {
            return Err(Error::BackendUnavailable("requested more handles than pool capacity"));
        }

        let already_held = HELD_POOLS.with(|h| h.borrow().contains(self.name));
        if already_held {
            return Err(Error::BackendUnavailable(
                "pool re-entered by the resource's own owner thread",
            ));
        }

        let mut guard = self.inner.lock();
        while guard.batch_in_progress {
            guard.waiting += 1;
            let result = self.turn.timed_wait(&mut guard, deadline);
            guard.waiting -= 1;
            if result == WaitResult::Timeout {
                return Err(Error::Timeout("resource pool"));
            }
        }
        guard.batch_in_progress = true;

        let mut handles = Vec::with_capacity(n);
        while handles.len() < n {
            let now = Instant::now();
            if let Some(entry) = self.take_fresh_idle(&mut guard, now) {
                handles.push(Handle {
                    created_at: entry.created_at,
                    epoch: entry.epoch,
                    resource: Some(entry.resource),
                });
                continue;
            }

            if guard.num_open < self.config.max_open {
                guard.num_open += 1;
                let epoch = guard.epoch;
                drop(guard);
                let created = (self.factory)();
                guard = self.inner.lock();
                match created {
                    Ok(resource) => {
                        handles.push(Handle {
                            resource: Some(resource),
                            created_at: Instant::now(),
                            epoch,
                        });
                        continue;
                    }
                    Err(e) => {
                        guard.num_open -= 1;
                        self.release_batch(&mut guard, handles);
                        return Err(e);
                    }
                }
            }

            guard.waiting += 1;
            let result = self.availability.timed_wait(&mut guard, deadline);
            guard.waiting -= 1;
            if result == WaitResult::Timeout {
                self.release_batch(&mut guard, handles);
                return Err(Error::Timeout("resource pool"));
            }
        }

        guard.batch_in_progress = false;
        drop(guard);
        self.turn.notify_one();
        HELD_POOLS.with(|h| h.borrow_mut().insert(self.name));
        Ok(handles)
    }

    /// Pops idle entries until a non-stale one is found (dropping each
    /// stale one and decrementing `num_open`), or the idle queue empties.
    fn take_fresh_idle(&self, guard: &mut parking_lot::MutexGuard<'_, Inner<R>>, now: Instant) -> Option<Entry<R>> {
        while let Some(entry) = guard.idle.pop_front() {
            if self.is_stale(&entry, guard.epoch, now) {
                guard.num_open -= 1;
                continue;
            }
            return Some(entry);
        }
        None
    }

    /// Releases a partially-assembled batch back onto the idle list (these
    /// are real, still-open resources, not stale ones) and clears the batch
    /// ticket so the next waiter can proceed.
    fn release_batch(&self, guard: &mut parking_lot::MutexGuard<'_, Inner<R>>, handles: Vec<Handle<R>>) {
        let now = Instant::now();
        for mut handle in handles {
            let resource = handle.resource.take().expect("resource taken");
            guard.idle.push_back(Entry {
                resource,
                created_at: handle.created_at,
                last_used: now,
                epoch: handle.epoch,
            });
        }
        guard.batch_in_progress = false;
        self.turn.notify_one();
        self.availability.notify_one();
    }

    /// Returns a resource for reuse. Stale resources (epoch bumped since
    /// checkout, or past their lifetime) are dropped instead of recycled.
    pub fn put(&self, mut handle: Handle<R>) {
        HELD_POOLS.with(|h| {
            h.borrow_mut().remove(self.name);
        });
        let resource = handle.resource.take().expect("resource taken");
        let mut guard = self.inner.lock();
        let now = Instant::now();
        let stale = handle.epoch != guard.epoch
            || now.duration_since(handle.created_at) > self.config.max_lifetime;
        if stale {
            guard.num_open -= 1;
        } else {
            guard.idle.push_back(Entry {
                resource,
                created_at: handle.created_at,
                last_used: now,
                epoch: handle.epoch,
            });
        }
        drop(guard);
        self.turn.notify_one();
        self.availability.notify_one();
    }

    /// Discards a resource unconditionally — for a handler that detected
    /// the resource is broken and must not let it back into circulation.
    pub fn bounce(&self, mut handle: Handle<R>) {
        HELD_POOLS.with(|h| {
            h.borrow_mut().remove(self.name);
        });
        handle.resource.take();
        let mut guard = self.inner.lock();
        guard.num_open -= 1;
        drop(guard);
        self.turn.notify_one();
        self.availability.notify_one();
    }

    /// Drops every idle resource past `max_idle_time`. Intended to be
    /// called periodically from a dedicated sweeper thread (see
    /// `spawn_sweeper`), not from request-handling threads.
    pub fn sweep(&self) {
        let mut guard = self.inner.lock();
        let now = Instant::now();
        let epoch = guard.epoch;
        let max_idle = self.config.max_idle_time;
        let max_lifetime = self.config.max_lifetime;
        let before = guard.idle.len();
        guard.idle.retain(|e| {
            e.epoch == epoch
                && now.duration_since(e.last_used) <= max_idle
                && now.duration_since(e.created_at) <= max_lifetime
        });
        guard.num_open -= before - guard.idle.len();
    }

    pub fn stats(&self) -> PoolStats {
        let guard = self.inner.lock();
        PoolStats {
            num_open: guard.num_open,
            num_idle: guard.idle.len(),
            num_waiting: guard.waiting,
            max_open: self.config.max_open,
        }
    }

    /// Spawns a background thread that calls [`Pool::sweep`] on the
    /// configured interval until `self` is dropped. The thread holds only
    /// a weak-equivalent raw pointer lifetime via `Arc`, so callers should
    /// hold the pool behind an `Arc` and pass a clone here.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>) -> Option<std::thread::JoinHandle<()>> {
        let interval = self.config.sweep_interval?;
        let pool = std::sync::Arc::downgrade(self);
        Some(crate::sync::spawn_named(
            format!("{}-sweeper", self.name),
            256 * 1024,
            move || loop {
                std::thread::sleep(interval);
                match pool.upgrade() {
                    Some(pool) => pool.sweep(),
                    None => return,
                }
            },
        ))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub num_open: usize,
    pub num_idle: usize,
    pub num_waiting: usize,
    pub max_open: usize,
}

impl PoolStats {
    pub fn utilization(&self) -> f64 {
        if self.max_open == 0 {
            0.0
        } else {
            (self.num_open - self.num_idle) as f64 / self.max_open as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn far_future() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn reuses_returned_resource_instead_of_creating_new() {
        let created = Arc::new(AtomicUsize::new(0));
        let c = created.clone();
        let pool: Pool<u32> = Pool::new(
            "test",
            PoolConfig { max_open: 1, ..Default::default() },
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            },
        );

        let mut h1 = pool.get(1, far_future()).unwrap();
        pool.put(h1.pop().unwrap());
        let mut h2 = pool.get(1, far_future()).unwrap();
        let h2 = h2.pop().unwrap();
        assert_eq!(*h2, 42);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool: Pool<u32> = Pool::new(
            "exhaust",
            PoolConfig { max_open: 1, ..Default::default() },
            || Ok(1),
        );
        let _h1 = pool.get(1, far_future()).unwrap();
        let deadline = Instant::now() + Duration::from_millis(30);
        let result = pool.get(1, deadline);
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[test]
    fn requesting_more_than_capacity_fails_immediately_not_as_a_timeout() {
        let pool: Pool<u32> = Pool::new(
            "too-big",
            PoolConfig { max_open: 2, ..Default::default() },
            || Ok(1),
        );
        let deadline = Instant::now() + Duration::from_millis(30);
        let started = Instant::now();
        let result = pool.get(3, deadline);
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert!(started.elapsed() < Duration::from_millis(30));
    }

    #[test]
    fn batch_get_acquires_all_n_atomically() {
        let created = Arc::new(AtomicUsize::new(0));
        let c = created.clone();
        let pool: Pool<u32> = Pool::new(
            "batch",
            PoolConfig { max_open: 3, ..Default::default() },
            move || Ok(c.fetch_add(1, Ordering::SeqCst) as u32),
        );

        let handles = pool.get(3, far_future()).unwrap();
        assert_eq!(handles.len(), 3);
        assert_eq!(pool.stats().num_open, 3);
    }

    #[test]
    fn bounced_resource_is_not_reused() {
        let created = Arc::new(AtomicUsize::new(0));
        let c = created.clone();
        let pool: Pool<u32> = Pool::new(
            "bounce",
            PoolConfig { max_open: 2, ..Default::default() },
            move || {
                let n = c.fetch_add(1, Ordering::SeqCst);
                Ok(n as u32)
            },
        );
        let mut h1 = pool.get(1, far_future()).unwrap();
        pool.bounce(h1.pop().unwrap());
        assert_eq!(pool.stats().num_open, 0);
    }

    #[test]
    fn epoch_bump_invalidates_idle_resources() {
        let pool: Pool<u32> = Pool::new(
            "epoch",
            PoolConfig { max_open: 2, ..Default::default() },
            || Ok(7),
        );
        let mut h1 = pool.get(1, far_future()).unwrap();
        pool.put(h1.pop().unwrap());
        assert_eq!(pool.stats().num_idle, 1);
        pool.bump_epoch();
        assert_eq!(pool.stats().num_idle, 0);
        assert_eq!(pool.stats().num_open, 0);
    }
}
