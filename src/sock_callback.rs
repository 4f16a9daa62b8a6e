//! Single-thread `poll`-based socket readiness engine (C2).
//!
//! Grounded in `examples/original_source/nsd/sockcallback.c`: one thread
//! owns an [`Engine`], registers sockets on it along with a callback and
//! an optional per-registration timeout, and drives it with repeated
//! [`Engine::run_once`] calls. Registration/cancellation from other
//! threads goes through an [`EngineHandle`], which queues the request and
//! wakes the engine's `poll` via [`mio::Waker`] — the same
//! queue-then-trigger shape as the original's `Queue` + `CallbackTrigger`
//! over its wakeup pipe.
//!
//! `Engine` is reused by the driver's accept/read-ahead loop and by the
//! writer/spooler offload threads; each owns a private instance rather
//! than sharing one across threads, consistent with the "no shared
//! run loop" part of the concurrency model.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on how long a single [`Engine::run_once`] call blocks in
/// `poll` when nothing is due to time out, so shutdown and newly-queued
/// registrations are never starved for long.
pub const POLL_CEILING: Duration = Duration::from_secs(30);

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Why a registered callback is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
    /// The socket reported an error condition.
    Error,
    /// The registration's timeout elapsed before it became ready.
    Timeout,
}

/// What a callback wants to happen to its registration next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep the registration active.
    Continue,
    /// Deregister the source; the callback will not be invoked again.
    Done,
}

type CallbackFn = dyn FnMut(Readiness) -> Control + Send;

struct Registered {
    source: Box<dyn Source + Send>,
    callback: Box<CallbackFn>,
    deadline: Option<Instant>,
}

enum Intake {
    Register {
        source: Box<dyn Source + Send>,
        interest: Interest,
        timeout: Option<Duration>,
        callback: Box<CallbackFn>,
    },
    Cancel(Token),
    Shutdown,
}

/// A cheaply-cloneable handle for queuing registrations onto an [`Engine`]
/// from another thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: crossbeam::channel::Sender<Intake>,
    waker: Arc<Waker>,
}

impl EngineHandle {
    /// Queues a registration. The token returned identifies it for a
    /// later [`EngineHandle::cancel`]; it is assigned before the engine
    /// thread actually processes the request, so it can be used
    /// immediately.
    pub fn register(
        &self,
        source: Box<dyn Source + Send>,
        interest: Interest,
        timeout: Option<Duration>,
        callback: impl FnMut(Readiness) -> Control + Send + 'static,
    ) -> io::Result<()> {
        self.tx
            .send(Intake::Register {
                source,
                interest,
                timeout,
                callback: Box::new(callback),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "engine shut down"))?;
        self.waker.wake()
    }

    pub fn cancel(&self, token: Token) -> io::Result<()> {
        self.tx
            .send(Intake::Cancel(token))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "engine shut down"))?;
        self.waker.wake()
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.tx
            .send(Intake::Shutdown)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "engine shut down"))?;
        self.waker.wake()
    }
}

/// A single-thread readiness engine. Not `Send`/`Sync` by itself — only
/// its [`EngineHandle`] crosses threads; the `Engine` itself is driven by
/// whichever thread created it.
pub struct Engine {
    poll: Poll,
    waker: Arc<Waker>,
    entries: HashMap<Token, Registered>,
    next_token: usize,
    intake_tx: crossbeam::channel::Sender<Intake>,
    intake_rx: crossbeam::channel::Receiver<Intake>,
    shutting_down: bool,
}

impl Engine {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (intake_tx, intake_rx) = crossbeam::channel::unbounded();
        Ok(Self {
            poll,
            waker,
            entries: HashMap::new(),
            next_token: 0,
            intake_tx,
            intake_rx,
            shutting_down: false,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.intake_tx.clone(),
            waker: self.waker.clone(),
        }
    }

    fn next_token(&mut self) -> Token {
        loop {
            let candidate = Token(self.next_token);
            self.next_token = self.next_token.wrapping_add(1);
            if candidate != WAKE_TOKEN && !self.entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn drain_intake(&mut self) {
        while let Ok(msg) = self.intake_rx.try_recv() {
            match msg {
                Intake::Register {
                    mut source,
                    interest,
                    timeout,
                    callback,
                } => {
                    let token = self.next_token();
                    if self
                        .poll
                        .registry()
                        .register(&mut *source, token, interest)
                        .is_ok()
                    {
                        self.entries.insert(
                            token,
                            Registered {
                                source,
                                callback,
                                deadline: timeout.map(|d| Instant::now() + d),
                            },
                        );
                    }
                }
                Intake::Cancel(token) => self.deregister(token),
                Intake::Shutdown => self.shutting_down = true,
            }
        }
    }

    fn deregister(&mut self, token: Token) {
        if let Some(mut entry) = self.entries.remove(&token) {
            let _ = self.poll.registry().deregister(&mut *entry.source);
        }
    }

    fn reap_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<Token> = self
            .entries
            .iter()
            .filter_map(|(token, entry)| match entry.deadline {
                Some(deadline) if deadline <= now => Some(*token),
                _ => None,
            })
            .collect();
        for token in expired {
            if let Some(entry) = self.entries.get_mut(&token) {
                if (entry.callback)(Readiness::Timeout) == Control::Done {
                    self.deregister(token);
                }
            }
        }
    }

    /// Drains queued registrations, blocks in `poll` for up to
    /// `poll_ceiling` (or until a timeout/registration wakes it early),
    /// dispatches ready callbacks, and reaps expired timeouts. Returns
    /// `false` once [`EngineHandle::shutdown`] has been requested and
    /// there is nothing left registered, signalling the owning thread's
    /// loop to stop calling it.
    pub fn run_once(&mut self, poll_ceiling: Duration) -> io::Result<bool> {
        self.drain_intake();

        let wait = self
            .entries
            .values()
            .filter_map(|e| e.deadline)
            .map(|d| d.saturating_duration_since(Instant::now()))
            .min()
            .map(|d| d.min(poll_ceiling))
            .unwrap_or(poll_ceiling);

        let mut events = Events::with_capacity(128);
        self.poll.poll(&mut events, Some(wait))?;

        let ready: Vec<Token> = events
            .iter()
            .filter(|e| e.token() != WAKE_TOKEN)
            .map(|e| e.token())
            .collect();

        for token in ready {
            let event = events.iter().find(|e| e.token() == token);
            let Some(event) = event else { continue };
            let readiness = if event.is_error() {
                Readiness::Error
            } else if event.is_readable() {
                Readiness::Readable
            } else if event.is_writable() {
                Readiness::Writable
            } else {
                continue;
            };
            if let Some(entry) = self.entries.get_mut(&token) {
                if (entry.callback)(readiness) == Control::Done {
                    self.deregister(token);
                }
            }
        }

        self.reap_timeouts();

        Ok(!(self.shutting_down && self.entries.is_empty()))
    }

    pub fn registered_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;
    use std::net::TcpStream as StdTcpStream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn accept_readiness_invokes_callback() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let addr = std_listener.local_addr().unwrap();
        let mio_listener = TcpListener::from_std(std_listener);

        let mut engine = Engine::new().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();

        engine
            .handle()
            .register(Box::new(mio_listener), Interest::READABLE, None, move |readiness| {
                if readiness == Readiness::Readable {
                    fired2.store(true, Ordering::SeqCst);
                }
                Control::Done
            })
            .unwrap();

        let _client = StdTcpStream::connect(addr).unwrap();

        for _ in 0..20 {
            engine.run_once(Duration::from_millis(50)).unwrap();
            if fired.load(Ordering::SeqCst) {
                break;
            }
        }
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn timeout_fires_without_readiness() {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let mio_listener = TcpListener::from_std(std_listener);

        let mut engine = Engine::new().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();

        engine
            .handle()
            .register(
                Box::new(mio_listener),
                Interest::READABLE,
                Some(Duration::from_millis(10)),
                move |readiness| {
                    if readiness == Readiness::Timeout {
                        fired2.store(true, Ordering::SeqCst);
                    }
                    Control::Done
                },
            )
            .unwrap();

        for _ in 0..20 {
            engine.run_once(Duration::from_millis(20)).unwrap();
            if fired.load(Ordering::SeqCst) {
                break;
            }
        }
        assert!(fired.load(Ordering::SeqCst));
    }
}
