//! Server lifecycle callback registry (C10).
//!
//! Grounded in `examples/original_source/nsd/callbacks.c`: six FIFO lists
//! of no-argument hooks fired at fixed points in the server lifecycle.
//! This is the only surface a telnet/control-port style external channel
//! would hook into (see `DESIGN.md`'s Open Question #4) — no such channel
//! is implemented here.

/// One of the six lifecycle points a callback can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before any driver or pool is started.
    PreStartup,
    /// After pools and drivers are running, before the server accepts
    /// connections.
    Startup,
    /// On receipt of a reconfiguration/status signal (e.g. SIGHUP).
    Signal,
    /// Once the server is ready to accept connections.
    Ready,
    /// Shutdown has been requested; drivers have stopped accepting but
    /// workers may still be draining.
    Shutdown,
    /// Final teardown, after every worker and driver thread has joined.
    Exit,
}

type Hook = dyn Fn() + Send + Sync;

/// Six independent FIFO hook lists, one per [`Phase`].
#[derive(Default)]
pub struct Registry {
    pre_startup: Vec<Box<Hook>>,
    startup: Vec<Box<Hook>>,
    signal: Vec<Box<Hook>>,
    ready: Vec<Box<Hook>>,
    shutdown: Vec<Box<Hook>>,
    exit: Vec<Box<Hook>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn list_mut(&mut self, phase: Phase) -> &mut Vec<Box<Hook>> {
        match phase {
            Phase::PreStartup => &mut self.pre_startup,
            Phase::Startup => &mut self.startup,
            Phase::Signal => &mut self.signal,
            Phase::Ready => &mut self.ready,
            Phase::Shutdown => &mut self.shutdown,
            Phase::Exit => &mut self.exit,
        }
    }

    /// Registers `hook` to run at `phase`, appended after any hook already
    /// registered for that phase.
    pub fn register(&mut self, phase: Phase, hook: impl Fn() + Send + Sync + 'static) {
        self.list_mut(phase).push(Box::new(hook));
    }

    /// Runs every hook registered for `phase`, in FIFO registration
    /// order. A panicking hook is not caught here — callers that need
    /// shutdown/exit hooks to run unconditionally should wrap individual
    /// hooks in `catch_unwind` themselves.
    pub fn run(&self, phase: Phase) {
        let list = match phase {
            Phase::PreStartup => &self.pre_startup,
            Phase::Startup => &self.startup,
            Phase::Signal => &self.signal,
            Phase::Ready => &self.ready,
            Phase::Shutdown => &self.shutdown,
            Phase::Exit => &self.exit,
        };
        for hook in list {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn hooks_run_fifo_and_only_for_their_phase() {
        let mut registry = Registry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        registry.register(Phase::Startup, move || o1.lock().unwrap().push(1));
        let o2 = order.clone();
        registry.register(Phase::Startup, move || o2.lock().unwrap().push(2));
        let o3 = order.clone();
        registry.register(Phase::Exit, move || o3.lock().unwrap().push(99));

        registry.run(Phase::Startup);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        registry.run(Phase::Exit);
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 99]);
    }

    #[test]
    fn empty_phase_runs_without_hooks() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.run(Phase::Signal);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
