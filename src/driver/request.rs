//! Request line, header, and body parsing.
//!
//! Parsing style (byte scanning via `memchr`, small-function decomposition)
//! follows `examples/AmakeSashaDev-maker_web/src/http/request.rs`, but this
//! version parses into an owned [`Request`] rather than borrowing
//! `&'static` slices out of the connection buffer via `unsafe` — see
//! `DESIGN.md` for the rationale.

use crate::error::ParseError;
use crate::http::types::{Method, Version};
use crate::http::url::Url;
use memchr::memchr;

/// A fully parsed HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub version: Version,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Case-insensitive header lookup, first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn content_length(&self) -> Result<Option<usize>, ParseError> {
        match self.header("content-length") {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| ParseError::InvalidContentLength),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    pub fn expects_continue(&self) -> bool {
        self.header("expect")
            .map(|v| v.eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    /// Whether the connection should be kept alive after this request,
    /// combining the protocol version's default with any explicit
    /// `Connection` header.
    pub fn keep_alive(&self) -> Result<bool, ParseError> {
        match self.header("connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => Ok(false),
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => Ok(true),
            Some(_) => Err(ParseError::InvalidConnection),
            None => Ok(self.version.keepalive_by_default()),
        }
    }
}

/// The request line plus how many bytes it (and its terminating CRLF)
/// occupied in the buffer.
struct RequestLine {
    method: Method,
    target: String,
    version: Version,
    consumed: usize,
}

fn parse_request_line(buf: &[u8]) -> Result<RequestLine, ParseError> {
    let line_end = memchr(b'\n', buf).ok_or(ParseError::InvalidUrl)?;
    let line = &buf[..line_end];
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let (method, method_len) = Method::from_bytes(buf)?;
    let rest = &line[method_len..];
    let rest = rest.strip_prefix(b" ").ok_or(ParseError::InvalidUrl)?;

    let target_end = memchr(b' ', rest).ok_or(ParseError::InvalidVersion)?;
    let target = std::str::from_utf8(&rest[..target_end]).map_err(|_| ParseError::InvalidUrl)?;
    if target.is_empty() {
        return Err(ParseError::InvalidUrl);
    }

    let version_bytes = &rest[target_end + 1..];
    let version = Version::from_bytes(version_bytes)?;

    Ok(RequestLine {
        method,
        target: target.to_string(),
        version,
        consumed: line_end + 1,
    })
}

/// Parses the header block starting right after the request line, up to
/// and including the terminating blank line. Returns the headers and the
/// number of bytes consumed.
fn parse_headers(
    buf: &[u8],
    max_headers: usize,
) -> Result<(Vec<(String, String)>, usize), ParseError> {
    let mut headers = Vec::new();
    let mut offset = 0;

    loop {
        let line_end = memchr(b'\n', &buf[offset..]).ok_or(ParseError::InvalidHeader)?;
        let line = &buf[offset..offset + line_end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        offset += line_end + 1;

        if line.is_empty() {
            return Ok((headers, offset));
        }
        if headers.len() >= max_headers {
            return Err(ParseError::TooManyHeaders);
        }

        let colon = memchr(b':', line).ok_or(ParseError::InvalidHeader)?;
        let name = std::str::from_utf8(&line[..colon]).map_err(|_| ParseError::InvalidHeader)?;
        if name.is_empty() {
            return Err(ParseError::InvalidHeader);
        }
        let value = line[colon + 1..]
            .iter()
            .position(|&b| b != b' ' && b != b'\t')
            .map(|start| &line[colon + 1 + start..])
            .unwrap_or(b"");
        let value = std::str::from_utf8(value).map_err(|_| ParseError::InvalidHeader)?;

        headers.push((name.to_string(), value.to_string()));
    }
}

/// Decodes an RFC 7230 chunked body from `buf`, which must contain the
/// entire encoded body (no streaming partial decode here — the caller is
/// responsible for buffering or spooling until the terminating zero-size
/// chunk has arrived).
pub fn decode_chunked(buf: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(buf.len());
    let mut offset = 0;

    loop {
        let line_end = memchr(b'\n', &buf[offset..]).ok_or(ParseError::InvalidChunkedBody)?;
        let size_line = &buf[offset..offset + line_end];
        let size_line = size_line.strip_suffix(b"\r").unwrap_or(size_line);
        offset += line_end + 1;

        let size_str = size_line
            .split(|&b| b == b';')
            .next()
            .unwrap_or(size_line);
        let size_str =
            std::str::from_utf8(size_str).map_err(|_| ParseError::InvalidChunkedBody)?;
        let size = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| ParseError::InvalidChunkedBody)?;

        if size == 0 {
            // Trailer section: consume headers up to the blank line, if any.
            let (_, _consumed) = parse_headers(&buf[offset..], usize::MAX)
                .unwrap_or_else(|_| (Vec::new(), buf.len() - offset));
            return Ok(out);
        }

        if offset + size + 2 > buf.len() {
            return Err(ParseError::InvalidChunkedBody);
        }
        out.extend_from_slice(&buf[offset..offset + size]);
        offset += size;

        if &buf[offset..offset + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunkedBody);
        }
        offset += 2;
    }
}

/// Parses a complete request (request line + headers + any body already
/// present in `buf`) given the already-decoded body bytes. The driver is
/// responsible for reading enough of the connection to satisfy
/// `Content-Length` (or fully decoding a chunked body) before calling
/// this — see `driver::TcpDriver::read_request`.
pub fn parse_request(
    buf: &[u8],
    max_headers: usize,
    body: Vec<u8>,
) -> Result<Request, ParseError> {
    let request_line = parse_request_line(buf)?;
    let (headers, _header_len) = parse_headers(&buf[request_line.consumed..], max_headers)?;

    Ok(Request {
        method: request_line.method,
        url: Url::parse(&request_line.target),
        version: request_line.version,
        headers,
        body,
    })
}

/// Returns the byte offset of the end of the header block (the blank line
/// that terminates it), or `None` if the buffer does not yet contain a
/// complete header block. Used by the driver's read-ahead loop to know
/// when it can stop reading headers and start on the body.
pub fn header_block_end(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n\r\n").map(|pos| pos + 4)
}
