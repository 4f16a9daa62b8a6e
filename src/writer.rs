//! Writer and spooler offload threads (C8): a small pool of background
//! threads that take large response sends and large request-body receives
//! off a connection-pool worker, so the worker is free to pick up the next
//! queued job instead of blocking on a slow socket.
//!
//! Grounded in `examples/original_source/nsd/sockfile.c`'s writer-thread
//! contract: a worker that decides a transfer is big enough hands the
//! socket to the pool's intake and gets its thread back immediately; the
//! writer thread itself polls the socket for readiness and drains the
//! transfer in chunks, tracking bytes sent/received against the total.
//! Each pool thread owns a private [`crate::sock_callback::Engine`], same
//! as the driver's read-ahead loop (§4.2).

use crate::driver::{self, Sock};
use crate::http::response::Body;
use crate::sock_callback::{self, Control, Engine, EngineHandle, Readiness};
use crate::sync;
use mio::net::TcpStream as MioTcpStream;
use mio::Interest;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHUNK: usize = 64 * 1024;

/// What happened to a [`Sock`] handed to the writer/spooler once its
/// transfer finishes.
pub enum Outcome {
    /// The transfer completed; the connection may be reused if `keep` is
    /// true.
    Done { sock: Sock, keep: bool },
    /// The socket errored or timed out mid-transfer; the connection is
    /// already closed.
    Failed(io::Error),
}

/// Round-robins jobs across N background threads, each driving its own
/// [`sock_callback::Engine`].
struct OffloadPool {
    handles: Vec<EngineHandle>,
    next: AtomicUsize,
}

impl OffloadPool {
    fn spawn(name: &'static str, threads: usize) -> io::Result<Self> {
        let mut handles = Vec::with_capacity(threads.max(1));
        for i in 0..threads.max(1) {
            let mut engine = Engine::new()?;
            handles.push(engine.handle());
            sync::spawn_named(format!("{name}-{i}"), 0, move || loop {
                match engine.run_once(sock_callback::POLL_CEILING) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => sync::fatal(&format!("{name} engine poll failed: {e}")),
                }
            });
        }
        Ok(Self {
            handles,
            next: AtomicUsize::new(0),
        })
    }

    fn pick(&self) -> &EngineHandle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[i]
    }

    fn shutdown(&self) {
        for handle in &self.handles {
            let _ = handle.shutdown();
        }
    }
}

/// Where a queued send currently stands: first the in-memory prefix drains
/// (status line + headers, plus the whole body for [`Body::Memory`]), then
/// — only for [`Body::File`] — a file range streams in fixed-size chunks.
struct SendProgress {
    prefix_sent: usize,
    file_body: Option<FileBody>,
}

struct FileBody {
    file: std::fs::File,
    offset: u64,
    end: u64,
}

/// Offloads large response sends off the connection-pool worker thread.
pub struct WriterPool {
    pool: OffloadPool,
    sendwait: Duration,
}

impl WriterPool {
    pub fn new(threads: usize, sendwait: Duration) -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            pool: OffloadPool::spawn("writer", threads)?,
            sendwait,
        }))
    }

    /// Queues `head` (the serialized status line and headers) followed by
    /// `body` for background sending on `sock`, invoking `on_complete` once
    /// the transfer finishes or fails. The caller's worker thread is free
    /// to return to the pool as soon as this call returns.
    pub fn queue(
        &self,
        sock: Sock,
        mut head: Vec<u8>,
        body: Body,
        keep: bool,
        on_complete: impl FnOnce(Outcome) + Send + 'static,
    ) -> io::Result<()> {
        let Sock {
            peer_addr,
            stream,
            buf,
            requests_served,
        } = sock;
        stream.set_nonblocking(true)?;
        let mio_stream = MioTcpStream::from_std(stream.try_clone()?);

        let file_body = match &body {
            Body::Memory(data) => {
                head.extend_from_slice(data);
                None
            }
            // The file handle is opened eagerly so a missing file fails
            // fast instead of mid-transfer.
            Body::File { path, range } => Some(FileBody {
                file: std::fs::File::open(path)?,
                offset: range.start,
                end: range.end,
            }),
        };
        let mut progress = SendProgress {
            prefix_sent: 0,
            file_body,
        };

        let prefix = head;
        let mut stream_opt = Some(stream);
        let mut on_complete: Option<Box<dyn FnOnce(Outcome) + Send>> = Some(Box::new(on_complete));
        let sendwait = self.sendwait;
        let mut buf = buf;

        self.pool.pick().register(
            Box::new(mio_stream),
            Interest::WRITABLE,
            Some(sendwait),
            move |readiness| {
                match readiness {
                    Readiness::Timeout | Readiness::Error => {
                        if let Some(stream) = stream_opt.take() {
                            let _ = stream.shutdown(std::net::Shutdown::Both);
                        }
                        if let Some(cb) = on_complete.take() {
                            cb(Outcome::Failed(io::Error::new(
                                io::ErrorKind::TimedOut,
                                "writer send timed out",
                            )));
                        }
                        return Control::Done;
                    }
                    Readiness::Readable => return Control::Continue,
                    Readiness::Writable => {}
                }

                let Some(stream) = stream_opt.as_mut() else {
                    return Control::Done;
                };

                while progress.prefix_sent < prefix.len() {
                    match stream.write(&prefix[progress.prefix_sent..]) {
                        Ok(0) => {
                            return fail(
                                &mut stream_opt,
                                &mut on_complete,
                                io::Error::new(io::ErrorKind::WriteZero, "write returned 0"),
                            );
                        }
                        Ok(n) => progress.prefix_sent += n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Control::Continue
                        }
                        Err(e) => return fail(&mut stream_opt, &mut on_complete, e),
                    }
                }

                if let Some(file_body) = progress.file_body.as_mut() {
                    while file_body.offset < file_body.end {
                        let mut chunk = [0u8; CHUNK];
                        let want = ((file_body.end - file_body.offset) as usize).min(chunk.len());
                        if let Err(e) = file_body.file.seek(SeekFrom::Start(file_body.offset)) {
                            return fail(&mut stream_opt, &mut on_complete, e);
                        }
                        let n = match file_body.file.read(&mut chunk[..want]) {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(e) => return fail(&mut stream_opt, &mut on_complete, e),
                        };
                        match stream.write(&chunk[..n]) {
                            Ok(written) => file_body.offset += written as u64,
                            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                                return Control::Continue
                            }
                            Err(e) => return fail(&mut stream_opt, &mut on_complete, e),
                        }
                    }
                }

                let stream = stream_opt.take().unwrap();
                if let Some(cb) = on_complete.take() {
                    cb(Outcome::Done {
                        sock: Sock {
                            peer_addr,
                            stream,
                            buf: std::mem::take(&mut buf),
                            requests_served,
                        },
                        keep,
                    });
                }
                Control::Done
            },
        )
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

fn fail(
    stream_opt: &mut Option<std::net::TcpStream>,
    on_complete: &mut Option<Box<dyn FnOnce(Outcome) + Send>>,
    err: io::Error,
) -> Control {
    if let Some(stream) = stream_opt.take() {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    }
    if let Some(cb) = on_complete.take() {
        cb(Outcome::Failed(err));
    }
    Control::Done
}

/// Offloads large request-body receives off the driver's read-ahead loop:
/// a body whose declared size exceeds `readahead` is spooled to a temp
/// file by a background thread instead of read inline.
pub struct SpoolerPool {
    pool: OffloadPool,
    recvwait: Duration,
}

pub enum BodyKind {
    FixedLength(usize),
    Chunked,
}

impl SpoolerPool {
    pub fn new(threads: usize, recvwait: Duration) -> io::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            pool: OffloadPool::spawn("spooler", threads)?,
            recvwait,
        }))
    }

    /// Queues a body receive on `sock`, streaming it to a temp file as
    /// bytes arrive. `prefix` is whatever the driver already buffered.
    /// `on_complete` receives the socket (converted back to blocking) and
    /// the spooled path, or an error.
    pub fn queue(
        &self,
        sock: Sock,
        mut prefix: Vec<u8>,
        kind: BodyKind,
        maxinput: usize,
        on_complete: impl FnOnce(io::Result<(Sock, PathBuf)>) + Send + 'static,
    ) -> io::Result<()> {
        let Sock {
            peer_addr,
            stream,
            requests_served,
            ..
        } = sock;
        stream.set_nonblocking(true)?;
        let mio_stream = MioTcpStream::from_std(stream.try_clone()?);

        let mut file = tempfile::NamedTempFile::new()?;
        let mut written = 0usize;
        let mut stream_opt = Some(stream);
        let mut on_complete: Option<Box<dyn FnOnce(io::Result<(Sock, PathBuf)>) + Send>> =
            Some(Box::new(on_complete));
        let recvwait = self.recvwait;

        self.pool.pick().register(
            Box::new(mio_stream),
            Interest::READABLE,
            Some(recvwait),
            move |readiness| {
                match readiness {
                    Readiness::Timeout | Readiness::Error => {
                        if let Some(stream) = stream_opt.take() {
                            let _ = stream.shutdown(std::net::Shutdown::Both);
                        }
                        if let Some(cb) = on_complete.take() {
                            cb(Err(io::Error::new(
                                io::ErrorKind::TimedOut,
                                "spooler receive timed out",
                            )));
                        }
                        return Control::Done;
                    }
                    Readiness::Writable => return Control::Continue,
                    Readiness::Readable => {}
                }

                let Some(stream) = stream_opt.as_mut() else {
                    return Control::Done;
                };

                loop {
                    let done = match &kind {
                        BodyKind::FixedLength(len) => written >= *len,
                        BodyKind::Chunked => driver::request::decode_chunked(&prefix).is_ok(),
                    };
                    if done {
                        break;
                    }

                    let mut chunk = [0u8; CHUNK];
                    match stream.read(&mut chunk) {
                        Ok(0) => {
                            if let Some(stream) = stream_opt.take() {
                                let _ = stream.shutdown(std::net::Shutdown::Both);
                            }
                            if let Some(cb) = on_complete.take() {
                                cb(Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "connection closed mid-body",
                                )));
                            }
                            return Control::Done;
                        }
                        Ok(n) => match &kind {
                            BodyKind::FixedLength(_) => {
                                if let Err(e) = file.write_all(&chunk[..n]) {
                                    if let Some(cb) = on_complete.take() {
                                        cb(Err(e));
                                    }
                                    return Control::Done;
                                }
                                written += n;
                            }
                            BodyKind::Chunked => {
                                prefix.extend_from_slice(&chunk[..n]);
                                if prefix.len() > maxinput {
                                    if let Some(cb) = on_complete.take() {
                                        cb(Err(io::Error::new(
                                            io::ErrorKind::InvalidData,
                                            "chunked body exceeded maxinput",
                                        )));
                                    }
                                    return Control::Done;
                                }
                            }
                        },
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return Control::Continue
                        }
                        Err(e) => {
                            if let Some(cb) = on_complete.take() {
                                cb(Err(e));
                            }
                            return Control::Done;
                        }
                    }
                }

                if let BodyKind::Chunked = &kind {
                    if let Ok(decoded) = driver::request::decode_chunked(&prefix) {
                        if let Err(e) = file.write_all(&decoded) {
                            if let Some(cb) = on_complete.take() {
                                cb(Err(e));
                            }
                            return Control::Done;
                        }
                    }
                }

                let stream = stream_opt.take().unwrap();
                if stream.set_nonblocking(false).is_err() {
                    if let Some(cb) = on_complete.take() {
                        cb(Err(io::Error::new(
                            io::ErrorKind::Other,
                            "failed to restore blocking mode",
                        )));
                    }
                    return Control::Done;
                }

                let path = match file.keep() {
                    Ok((_, path)) => path,
                    Err(e) => {
                        if let Some(cb) = on_complete.take() {
                            cb(Err(e.error));
                        }
                        return Control::Done;
                    }
                };

                if let Some(cb) = on_complete.take() {
                    cb(Ok((
                        Sock {
                            peer_addr,
                            stream,
                            buf: Vec::new(),
                            requests_served,
                        },
                        path,
                    )));
                }
                Control::Done
            },
        )
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    fn accept_pair() -> (Sock, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer_addr) = listener.accept().unwrap();
        (
            Sock {
                peer_addr,
                stream: server,
                buf: Vec::new(),
                requests_served: 0,
            },
            client,
        )
    }

    #[test]
    fn writer_sends_memory_body_and_reports_completion() {
        let pool = WriterPool::new(1, StdDuration::from_secs(5)).unwrap();
        let (sock, mut client) = accept_pair();

        let (tx, rx) = mpsc::channel();
        pool.queue(
            sock,
            b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n".to_vec(),
            Body::Memory(b"hello".to_vec()),
            true,
            move |outcome| {
                tx.send(matches!(outcome, Outcome::Done { keep: true, .. }))
                    .unwrap();
            },
        )
        .unwrap();

        let mut received = Vec::new();
        client
            .set_read_timeout(Some(StdDuration::from_secs(2)))
            .unwrap();
        let mut buf = [0u8; 256];
        loop {
            let n = client.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            if received.ends_with(b"hello") {
                break;
            }
        }
        assert!(received.ends_with(b"hello"));
        assert!(rx.recv_timeout(StdDuration::from_secs(2)).unwrap());
        pool.shutdown();
    }

    #[test]
    fn spooler_writes_fixed_length_body_to_tempfile() {
        let pool = SpoolerPool::new(1, StdDuration::from_secs(5)).unwrap();
        let (sock, mut client) = accept_pair();

        let (tx, rx) = mpsc::channel();
        pool.queue(
            sock,
            Vec::new(),
            BodyKind::FixedLength(11),
            1 << 20,
            move |result| {
                tx.send(result).unwrap();
            },
        )
        .unwrap();

        client.write_all(b"hello world").unwrap();

        let result = rx.recv_timeout(StdDuration::from_secs(2)).unwrap();
        let (_sock, path) = result.unwrap();
        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, b"hello world");
        pool.shutdown();
    }
}
