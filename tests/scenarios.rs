//! End-to-end scenarios driven over real loopback TCP connections, one per
//! server instance so each test owns its own port and shutdown sequence.

use corehttpd::{Disposition, FilterPhase, Request, Response, Scope, Server, ServerConfig, StatusCode};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Grabs a free loopback port by binding and immediately dropping a
/// listener on it, then hands that address to a `Server` builder — the
/// server's own bind happens a moment later, which is fine for tests
/// since nothing else on this machine is racing for ephemeral ports.
fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Reads one full response off `stream`: the header block, then exactly
/// `Content-Length` more bytes if the header names one, or until EOF
/// otherwise (e.g. the `Connection: close` responses in these tests).
fn read_response(stream: &mut TcpStream) -> String {
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk) {
            Ok(0) => return String::from_utf8_lossy(&buf).into_owned(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => panic!("read failed: {e}"),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length:").map(|v| v.trim().to_string()))
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(want) = content_length {
        while buf.len() - header_end < want {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => panic!("read failed: {e}"),
            }
        }
    } else {
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => panic!("read failed: {e}"),
            }
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// S1: simple GET against an exact-scope handler.
#[test]
fn s1_simple_get() {
    fn hi(_: &mut (), _: &Request, resp: &mut Response) {
        resp.status(StatusCode::Ok).set_header("content-type", "text/plain");
        resp.body_str("hi");
    }

    let addr = free_addr();
    let server = Server::<()>::builder()
        .listen(addr)
        .route("GET", "/hello", Scope::Exact, hi)
        .build()
        .unwrap();
    let handle = server.launch().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
    let text = read_response(&mut client);

    assert!(text.starts_with("HTTP/1.1 200 OK"), "{text}");
    assert!(text.contains("content-length: 2"), "{text}");
    assert!(text.ends_with("hi"), "{text}");

    handle.shutdown();
}

/// S2: an inheriting handler answers descendants; a non-inheriting one at
/// a deeper exact path wins only at that exact path.
#[test]
fn s2_inheriting_vs_exact_handler() {
    fn h(_: &mut (), _: &Request, resp: &mut Response) {
        resp.status(StatusCode::Ok);
        resp.body_str("H");
    }
    fn h2(_: &mut (), _: &Request, resp: &mut Response) {
        resp.status(StatusCode::Ok);
        resp.body_str("H2");
    }

    let addr = free_addr();
    let server = Server::<()>::builder()
        .listen(addr)
        .route("GET", "/foo", Scope::Inherit, h)
        .route("GET", "/foo/bar", Scope::Exact, h2)
        .build()
        .unwrap();
    let handle = server.launch().unwrap();

    for (path, expect) in [("/foo/bar", "H2"), ("/foo/bar/baz", "H"), ("/foo/", "H")] {
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").as_bytes())
            .unwrap();
        let text = read_response(&mut client);
        assert!(text.starts_with("HTTP/1.1 200"), "path {path}: {text}");
        assert!(text.ends_with(expect), "path {path}: {text}");
    }

    handle.shutdown();
}

/// S3: a wildcard channel matches the glob but not other extensions.
#[test]
fn s3_wildcard_channel() {
    fn css(_: &mut (), _: &Request, resp: &mut Response) {
        resp.status(StatusCode::Ok);
        resp.body_str("css");
    }

    let addr = free_addr();
    let server = Server::<()>::builder()
        .listen(addr)
        .route("GET", "/assets/*.css", Scope::Exact, css)
        .build()
        .unwrap();
    let handle = server.launch().unwrap();

    let mut ok = TcpStream::connect(addr).unwrap();
    ok.write_all(b"GET /assets/site.css HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    assert!(read_response(&mut ok).starts_with("HTTP/1.1 200"));

    let mut miss = TcpStream::connect(addr).unwrap();
    miss.write_all(b"GET /assets/site.js HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    assert!(read_response(&mut miss).starts_with("HTTP/1.1 404"));

    handle.shutdown();
}

/// S4: a BREAK in the pre-auth chain stops later filters but still lets
/// the request reach the handler.
#[test]
fn s4_filter_break_stops_later_filters_but_not_the_handler() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn h(_: &mut (), _: &Request, resp: &mut Response) {
        resp.status(StatusCode::Ok);
        resp.body_str("handled");
    }

    let f1_ran = Arc::new(AtomicUsize::new(0));
    let f2_ran = Arc::new(AtomicUsize::new(0));
    let f3_ran = Arc::new(AtomicUsize::new(0));
    let (f1, f2, f3) = (Arc::clone(&f1_ran), Arc::clone(&f2_ran), Arc::clone(&f3_ran));

    let addr = free_addr();
    let server = Server::<()>::builder()
        .listen(addr)
        .route("GET", "/x", Scope::Exact, h)
        .register_filter("GET", "/x", FilterPhase::PreAuth, false, move |_ctx, _when| {
            f1.fetch_add(1, Ordering::SeqCst);
            Disposition::Ok
        })
        .register_filter("GET", "/x", FilterPhase::PreAuth, false, move |_ctx, _when| {
            f2.fetch_add(1, Ordering::SeqCst);
            Disposition::Break
        })
        .register_filter("GET", "/x", FilterPhase::PreAuth, false, move |_ctx, _when| {
            f3.fetch_add(1, Ordering::SeqCst);
            Disposition::Ok
        })
        .build()
        .unwrap();
    let handle = server.launch().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .write_all(b"GET /x HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    let text = read_response(&mut client);

    assert!(text.starts_with("HTTP/1.1 200"), "{text}");
    assert!(text.ends_with("handled"), "{text}");
    assert_eq!(f1_ran.load(Ordering::SeqCst), 1);
    assert_eq!(f2_ran.load(Ordering::SeqCst), 1);
    assert_eq!(f3_ran.load(Ordering::SeqCst), 0);

    handle.shutdown();
}

/// S6: a response above `writer.maxsize` is handed off to the writer
/// pool, and the client still receives every byte with an accurate
/// Content-Length.
#[test]
fn s6_writer_offload_delivers_full_body() {
    const LEN: usize = 1_000_000;

    fn big(_: &mut (), _: &Request, resp: &mut Response) {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![b'a'; LEN]).unwrap();
        let (_, path) = file.keep().unwrap();
        resp.status(StatusCode::Ok).set_header("content-type", "text/plain");
        resp.body_file(path, 0..LEN as u64);
    }

    let mut config = ServerConfig::default();
    config.driver.writer_maxsize = 4096;

    let addr = free_addr();
    let server = Server::<()>::builder()
        .listen(addr)
        .config(config)
        .route("GET", "/big", Scope::Exact, big)
        .build()
        .unwrap();
    let handle = server.launch().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .write_all(b"GET /big HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();

    let header_end = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let head = String::from_utf8_lossy(&buf[..header_end]);
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    assert!(head.contains(&format!("content-length: {LEN}")), "{head}");
    assert_eq!(buf.len() - header_end, LEN);
    assert!(buf[header_end..].iter().all(|&b| b == b'a'));

    handle.shutdown();
}
