//! `TcpDriver`: the built-in [`Driver`](super::Driver) implementation over
//! blocking `std::net::TcpStream`, plus its accept/read-ahead loop.
//!
//! Grounded in `examples/AmakeSashaDev-maker_web/src/server/server_impl.rs`
//! (`ServerBuilder::build`'s pre-spawned accept machinery) restructured per
//! §5: one dedicated OS thread multiplexes the listening socket and every
//! newly-accepted connection's header read-ahead via a private
//! [`sock_callback::Engine`], so worker threads in the connection pool are
//! only ever occupied running an actual request — never blocked waiting on
//! a client to finish sending its headers. Once a connection's header
//! block has arrived, the socket is converted back to blocking mode and
//! handed to the pool as a [`Sock`]; the worker owns the rest of that
//! connection's lifetime, including any further keep-alive requests,
//! exactly as `examples/AmakeSashaDev-maker_web/src/server/connection.rs`'s
//! `HttpConnection::run` loop does.

use super::{request, Driver, Sock};
use crate::config::DriverConfig;
use crate::pool::Conn;
use crate::sock_callback::{self, Control, Engine, EngineHandle, Readiness};
use crate::sync;
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::Interest;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct TcpDriver {
    config: DriverConfig,
}

impl TcpDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Binds and runs the accept/read-ahead loop on a dedicated thread,
    /// dispatching fully-headered connections into `pool`. Returns the
    /// thread handle and an [`EngineHandle`] the caller can use to shut the
    /// driver down (`handle.shutdown()`).
    pub fn run(
        self: Arc<Self>,
        addr: SocketAddr,
        backlog: i32,
        pool: Arc<crate::pool::ConnPool<Conn>>,
    ) -> io::Result<(JoinHandle<()>, EngineHandle)> {
        let listener = self.listen(addr, backlog)?;
        listener.set_nonblocking(true)?;

        let mut engine = Engine::new()?;
        let shutdown_handle = engine.handle();
        let accept_handle = engine.handle();
        let mio_listener = MioTcpListener::from_std(listener.try_clone()?);
        let driver = Arc::clone(&self);

        accept_handle
            .clone()
            .register(
                Box::new(mio_listener),
                Interest::READABLE,
                None,
                move |readiness| {
                    if readiness != Readiness::Readable {
                        return Control::Continue;
                    }
                    loop {
                        match listener.accept() {
                            Ok((stream, peer_addr)) => {
                                if let Err(e) = driver.begin_read_ahead(
                                    stream,
                                    peer_addr,
                                    Arc::clone(&pool),
                                    &accept_handle,
                                ) {
                                    tracing::warn!(
                                        error = %e,
                                        "failed to start read-ahead for accepted connection"
                                    );
                                }
                            }
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                            Err(e) => {
                                tracing::warn!(error = %e, "accept failed");
                                break;
                            }
                        }
                    }
                    Control::Continue
                },
            )?;

        let join = sync::spawn_named("driver", 0, move || loop {
            match engine.run_once(sock_callback::POLL_CEILING) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => sync::fatal(&format!("driver engine poll failed: {e}")),
            }
        });

        Ok((join, shutdown_handle))
    }

    /// Registers a freshly-accepted connection on `engine` for non-blocking
    /// read-ahead, dispatching it to `pool` once a complete header block
    /// has arrived (or dropping it on error, EOF, or `recvwait` timeout).
    fn begin_read_ahead(
        self: &Arc<Self>,
        stream: std::net::TcpStream,
        peer_addr: SocketAddr,
        pool: Arc<crate::pool::ConnPool<Conn>>,
        engine: &EngineHandle,
    ) -> io::Result<()> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        // `try_clone` dups the fd; both ends share the same open file
        // description (and so the same O_NONBLOCK flag), but each must be
        // dropped/closed independently — closing the mio-owned half below
        // does not tear down the connection, since `read_handle` still
        // holds the other half open.
        let read_handle = stream.try_clone()?;
        let mio_stream = MioTcpStream::from_std(stream);

        let driver = Arc::clone(self);
        let mut buf = Vec::with_capacity(self.config.readahead);
        let mut read_handle = Some(read_handle);

        engine.register(
            Box::new(mio_stream),
            Interest::READABLE,
            Some(self.config.recvwait()),
            move |readiness| {
                match readiness {
                    Readiness::Timeout | Readiness::Error => {
                        if let Some(stream) = read_handle.take() {
                            let _ = stream.shutdown(std::net::Shutdown::Both);
                        }
                        return Control::Done;
                    }
                    Readiness::Writable => return Control::Continue,
                    Readiness::Readable => {}
                }

                let Some(stream) = read_handle.as_mut() else {
                    return Control::Done;
                };

                let mut chunk = [0u8; 8192];
                loop {
                    match stream.read(&mut chunk) {
                        Ok(0) => {
                            read_handle.take();
                            return Control::Done;
                        }
                        Ok(n) => {
                            buf.extend_from_slice(&chunk[..n]);
                            if buf.len() >= driver.config.maxinput {
                                tracing::warn!("header block exceeded maxinput; dropping connection");
                                read_handle.take();
                                return Control::Done;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(_) => {
                            read_handle.take();
                            return Control::Done;
                        }
                    }
                }

                if request::header_block_end(&buf).is_none() {
                    return Control::Continue;
                }

                let Some(stream) = read_handle.take() else {
                    return Control::Done;
                };
                if stream.set_nonblocking(false).is_err() {
                    return Control::Done;
                }

                let sock = Sock {
                    peer_addr,
                    stream,
                    buf: std::mem::take(&mut buf),
                    requests_served: 0,
                };
                let mut conn = Conn::new(sock);
                conn.mark_queued();
                if pool.dispatch(conn).is_err() {
                    tracing::warn!(%peer_addr, "conn pool saturated; dropping connection");
                }
                Control::Done
            },
        )
    }
}

impl Driver for TcpDriver {
    fn listen(&self, addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        Ok(socket.into())
    }

    fn accept(&self, listener: &std::net::TcpListener) -> io::Result<Sock> {
        let (stream, peer_addr) = listener.accept()?;
        stream.set_nodelay(true)?;
        Ok(Sock {
            peer_addr,
            stream,
            buf: Vec::new(),
            requests_served: 0,
        })
    }

    fn recv(&self, sock: &mut Sock, buf: &mut [u8]) -> io::Result<usize> {
        sock.stream.set_read_timeout(Some(self.config.recvwait()))?;
        sock.stream.read(buf)
    }

    fn send(&self, sock: &mut Sock, buf: &[u8]) -> io::Result<usize> {
        sock.stream.set_write_timeout(Some(self.config.sendwait()))?;
        sock.stream.write(buf)
    }

    fn send_file(&self, sock: &mut Sock, path: &Path, range: Range<u64>) -> io::Result<u64> {
        sock.stream.set_write_timeout(Some(self.config.sendwait()))?;
        super::copy_file_range(&mut sock.stream, path, range)
    }

    fn keep(&self, sock: &Sock) -> bool {
        sock.stream.take_error().ok().flatten().is_none()
    }

    fn close(&self, sock: Sock) {
        let _ = sock.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;
    use std::time::Duration;

    #[test]
    fn accept_and_read_ahead_dispatches_once_headers_complete() {
        let driver = Arc::new(TcpDriver::new(DriverConfig::default()));
        let listener = driver.listen("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let addr = listener.local_addr().unwrap();

        let pool: Arc<crate::pool::ConnPool<Conn>> = crate::pool::ConnPool::new(
            "test-driver",
            crate::config::ConnPoolConfig {
                minthreads: 1,
                maxthreads: 1,
                threadtimeout_secs: 5,
                lowwatermark: 1,
                highwatermark: 4,
            },
            |conn: Conn, _slot| {
                assert!(request::header_block_end(&conn.sock.buf).is_some());
            },
        );

        let (join, engine_handle) = driver.clone().run(addr, 16, pool).unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .unwrap();

        std::thread::sleep(Duration::from_millis(200));
        engine_handle.shutdown().unwrap();
        join.join().unwrap();
    }
}
