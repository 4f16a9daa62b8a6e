//! Pluggable connection driver (C3): the socket operation contract handed
//! to the connection pool, plus request-body intake shared by every
//! concrete driver.
//!
//! `Driver` generalizes `nssock.c`'s `listenProc`/`acceptProc`/`recvProc`/
//! `sendProc`/`sendFileProc`/`keepProc`/`closeProc` table into a trait;
//! [`tcp::TcpDriver`] is the one built-in implementation. `Sock` itself
//! carries no behaviour, matching `Ns_Sock`'s role as a plain data record —
//! the driver supplies the operations.

pub mod request;
pub mod tcp;

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// An accepted connection, handed from the driver's accept/read-ahead loop
/// into a `pool::Conn` (and from there a `pool::ConnPool<Conn>` job) once a
/// complete header block (at least) has arrived.
pub struct Sock {
    pub peer_addr: SocketAddr,
    pub stream: std::net::TcpStream,
    /// Bytes already read off the wire during read-ahead — at minimum a
    /// full header block, and possibly some or all of the body.
    pub buf: Vec<u8>,
    pub requests_served: usize,
}

#[cfg(test)]
impl Sock {
    /// A `Sock` wrapping a real connected loopback pair, for tests
    /// elsewhere in the crate (e.g. `pool::Conn`) that need one but don't
    /// care about its contents.
    pub(crate) fn test_sock() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, peer_addr) = listener.accept().unwrap();
        drop(accepted);
        Self {
            peer_addr,
            stream,
            buf: Vec::new(),
            requests_served: 0,
        }
    }
}

/// Socket operation contract a connection pool job drives a request
/// through. Grounded in `Ns_Driver`'s proc table.
pub trait Driver: Send + Sync + 'static {
    fn listen(&self, addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener>;
    fn accept(&self, listener: &std::net::TcpListener) -> io::Result<Sock>;
    fn recv(&self, sock: &mut Sock, buf: &mut [u8]) -> io::Result<usize>;
    fn send(&self, sock: &mut Sock, buf: &[u8]) -> io::Result<usize>;
    fn send_file(&self, sock: &mut Sock, path: &Path, range: Range<u64>) -> io::Result<u64>;
    /// Whether the connection is healthy enough to keep open for another
    /// request (`Ns_DriverKeepProc`).
    fn keep(&self, sock: &Sock) -> bool;
    fn close(&self, sock: Sock);
}

/// Streams `range` of the file at `path` directly to `out`, in fixed-size
/// chunks, without buffering the whole file in memory — the idiomatic
/// stand-in for `Ns_ConnReturnOpenFd`'s raw-fd handoff.
pub fn copy_file_range(out: &mut impl Write, path: &Path, range: Range<u64>) -> io::Result<u64> {
    use std::io::{Seek, SeekFrom};
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(range.start))?;

    let mut remaining = range.end.saturating_sub(range.start);
    let mut chunk = [0u8; 64 * 1024];
    let mut sent = 0u64;
    while remaining > 0 {
        let want = remaining.min(chunk.len() as u64) as usize;
        let n = file.read(&mut chunk[..want])?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n])?;
        sent += n as u64;
        remaining -= n as u64;
    }
    Ok(sent)
}

/// Where a request body ended up after intake: small bodies stay in
/// memory, uploads past `DriverConfig::maxupload` are spooled to a temp
/// file so the server's memory use doesn't scale with upload size.
pub enum BodySource {
    Memory(Vec<u8>),
    Spooled(PathBuf),
}

/// Reads a fixed-length (`Content-Length`) body from `stream`, with
/// `prefix` holding whatever bytes the driver's read-ahead already
/// buffered past the header block. Spools to a temp file once the total
/// size exceeds `maxupload`.
pub fn read_body(
    stream: &mut impl Read,
    prefix: &[u8],
    content_length: usize,
    maxupload: usize,
) -> io::Result<BodySource> {
    if content_length <= maxupload {
        let mut body = Vec::with_capacity(content_length);
        body.extend_from_slice(&prefix[..prefix.len().min(content_length)]);
        read_exact_into(stream, &mut body, content_length)?;
        Ok(BodySource::Memory(body))
    } else {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(&prefix[..prefix.len().min(content_length)])?;
        let already = prefix.len().min(content_length);
        copy_exact(stream, &mut file, content_length - already)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(BodySource::Spooled(path))
    }
}

/// Reads a chunked body from `stream`, with `prefix` holding whatever the
/// driver's read-ahead already buffered. Keeps reading until
/// [`request::decode_chunked`] succeeds (i.e. the terminating chunk has
/// arrived), bounded by `maxinput` to cap memory use from a malformed or
/// endless chunked stream. Spools the decoded body if it exceeds
/// `maxupload`.
pub fn read_chunked_body(
    stream: &mut impl Read,
    prefix: &mut Vec<u8>,
    maxinput: usize,
    maxupload: usize,
) -> io::Result<BodySource> {
    loop {
        match request::decode_chunked(prefix) {
            Ok(decoded) => {
                return if decoded.len() > maxupload {
                    let mut file = tempfile::NamedTempFile::new()?;
                    file.write_all(&decoded)?;
                    let (_, path) = file.keep().map_err(|e| e.error)?;
                    Ok(BodySource::Spooled(path))
                } else {
                    Ok(BodySource::Memory(decoded))
                };
            }
            Err(_) if prefix.len() < maxinput => {
                let mut chunk = [0u8; 8192];
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-chunked-body",
                    ));
                }
                prefix.extend_from_slice(&chunk[..n]);
            }
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        }
    }
}

fn read_exact_into(stream: &mut impl Read, out: &mut Vec<u8>, target_len: usize) -> io::Result<()> {
    let mut chunk = [0u8; 8192];
    while out.len() < target_len {
        let want = (target_len - out.len()).min(chunk.len());
        let n = stream.read(&mut chunk[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-body",
            ));
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}

fn copy_exact(stream: &mut impl Read, out: &mut impl Write, mut remaining: usize) -> io::Result<()> {
    let mut chunk = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(chunk.len());
        let n = stream.read(&mut chunk[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-body",
            ));
        }
        out.write_all(&chunk[..n])?;
        remaining -= n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_body_stays_in_memory_under_maxupload() {
        let mut rest = Cursor::new(b"world".to_vec());
        let body = read_body(&mut rest, b"hello", 10, 1024).unwrap();
        match body {
            BodySource::Memory(bytes) => assert_eq!(bytes, b"helloworld"),
            BodySource::Spooled(_) => panic!("expected in-memory body"),
        }
    }

    #[test]
    fn read_body_spools_past_maxupload() {
        let payload = vec![b'x'; 100];
        let mut rest = Cursor::new(payload.clone());
        let body = read_body(&mut rest, b"", 100, 10).unwrap();
        match body {
            BodySource::Spooled(path) => {
                let on_disk = std::fs::read(&path).unwrap();
                assert_eq!(on_disk, payload);
            }
            BodySource::Memory(_) => panic!("expected spooled body"),
        }
    }

    #[test]
    fn read_chunked_body_decodes_once_complete() {
        let mut prefix = b"4\r\nWiki\r\n".to_vec();
        let mut rest = Cursor::new(b"5\r\npedia\r\n0\r\n\r\n".to_vec());
        let body = read_chunked_body(&mut rest, &mut prefix, 1 << 20, 1 << 20).unwrap();
        match body {
            BodySource::Memory(bytes) => assert_eq!(bytes, b"Wikipedia"),
            BodySource::Spooled(_) => panic!("expected in-memory body"),
        }
    }
}
