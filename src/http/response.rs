//! Response assembly: status line, headers, body, and the notice-page and
//! byte-range helpers built on top of them (C7).
//!
//! The teacher's `Response` is a strictly fluent, append-only buffer
//! builder — headers are written straight to the output buffer as soon as
//! `header()` is called, which is great for zero-allocation speed but
//! makes it impossible to ask "is this header already set" later, which
//! the duplicate-header policy below needs. This version keeps the same
//! finalize-on-body-call shape and the `close()`/`status()`/`body()`
//! vocabulary, but buffers headers in a `Vec<(String, String)>` first and
//! serializes them when the body is attached.

use crate::http::types::{StatusCode, Version};
use std::borrow::Cow;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    Clean,
    Headers,
    Complete,
}

/// The response body, chosen so a large file can be handed to a writer
/// thread without ever being copied into the process's memory.
#[derive(Debug, Clone)]
pub enum Body {
    Memory(Vec<u8>),
    /// A byte range of a file on disk, to be streamed by the driver's
    /// writer pool rather than read eagerly here. Grounded in the
    /// original's `Ns_ConnReturnOpenFd`/`ReturnOpenFile` handoff — the
    /// idiomatic equivalent of passing a raw fd onward is a path and an
    /// explicit range.
    File {
        path: std::path::PathBuf,
        range: Range<u64>,
    },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Memory(v) => v.len() as u64,
            Body::File { range, .. } => range.end - range.start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds one HTTP response: a status line, header table, and body.
#[derive(Debug)]
pub struct Response {
    version: Version,
    keep_alive: bool,
    status: Option<StatusCode>,
    headers: Vec<(String, String)>,
    body: Option<Body>,
    state: ResponseState,
}

#[doc(hidden)]
pub struct Handled(());

impl Response {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            keep_alive: version.keepalive_by_default(),
            status: None,
            headers: Vec::new(),
            body: None,
            state: ResponseState::Clean,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Forces the connection closed after this response regardless of the
    /// version's default.
    pub fn close(&mut self) -> &mut Self {
        self.keep_alive = false;
        self
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        debug_assert!(self.status.is_none(), "status() called more than once");
        self.status = Some(status);
        self.state = ResponseState::Headers;
        self
    }

    fn find_header(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Sets a header, overwriting any previous value with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.find_header(&name) {
            Some(i) => self.headers[i] = (name, value),
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Alias of [`set_header`](Self::set_header) — kept distinct in the
    /// public API for callers expecting `Ns_ConnUpdateHeaders`-style
    /// naming alongside `Ns_ConnSetHeaders`.
    pub fn update_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.set_header(name, value)
    }

    /// Sets a header only if it isn't already present.
    pub fn cond_set_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let name = name.into();
        if self.find_header(&name).is_none() {
            self.headers.push((name, value.into()));
        }
        self
    }

    /// Appends to an existing header's value, joined by `", "`, or inserts
    /// it fresh if absent.
    pub fn append_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.find_header(&name) {
            Some(i) => {
                self.headers[i].1.push_str(", ");
                self.headers[i].1.push_str(&value);
            }
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.set_header(name, value)
    }

    pub fn body(&mut self, data: impl Into<Vec<u8>>) -> Handled {
        self.body = Some(Body::Memory(data.into()));
        self.finalize()
    }

    pub fn body_str(&mut self, data: impl Into<String>) -> Handled {
        self.body(data.into().into_bytes())
    }

    /// Hands the body off as a file range, for the writer pool to stream
    /// directly from disk.
    pub fn body_file(
        &mut self,
        path: impl Into<std::path::PathBuf>,
        range: Range<u64>,
    ) -> Handled {
        self.body = Some(Body::File {
            path: path.into(),
            range,
        });
        self.finalize()
    }

    fn finalize(&mut self) -> Handled {
        debug_assert!(self.status.is_some(), "body set before status()");

        // Header-value sanitization: an embedded CR/LF could otherwise be
        // used to smuggle extra header lines or split the response.
        for (_, value) in &mut self.headers {
            if let Cow::Owned(sanitized) = sanitize_header_value(value) {
                *value = sanitized;
            }
        }

        if let Some(value) = self.connection_value() {
            self.set_header("connection", value);
        }

        self.state = ResponseState::Complete;
        Handled(())
    }

    fn connection_value(&self) -> Option<&'static str> {
        match (self.version, self.keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some("close"),
            (Version::Http10, true) => Some("keep-alive"),
            (Version::Http10, false) => Some("close"),
            (Version::Http09, _) => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ResponseState::Complete
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_ref(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Serializes the status line, headers, and a `content-length` header
    /// derived from the body, leaving the body itself for the caller to
    /// append (or stream separately, for [`Body::File`]).
    pub fn write_head(&self, out: &mut Vec<u8>) {
        let status = self.status.expect("finalize() requires a status");
        out.extend_from_slice(status.status_line(self.version));
        if self.version == Version::Http09 {
            return;
        }
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        let len = self.body.as_ref().map(Body::len).unwrap_or(0);
        out.extend_from_slice(format!("content-length: {len}\r\n\r\n").as_bytes());
    }

    /// Serializes the full response (head plus an in-memory body) in one
    /// buffer. Panics if the body is a [`Body::File`] — those are streamed
    /// by the writer pool instead.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_head(&mut out);
        if let Some(Body::Memory(data)) = &self.body {
            out.extend_from_slice(data);
        }
        out
    }
}

/// Replaces bare or embedded CR/LF with a folded continuation, matching
/// the original's header sanitization in `Ns_ConnSetHeaders`.
fn sanitize_header_value(value: &str) -> Cow<'_, str> {
    if !value.contains(['\r', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\n\t");
            }
            '\n' => out.push_str("\n\t"),
            other => out.push(other),
        }
    }
    out.into()
}

/// A single parsed byte range from a `Range: bytes=...` request header,
/// resolved against the resource's total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parses a `Range: bytes=a-b,c-d` header against a resource of `total`
/// bytes. `Err(())` means every requested range is unsatisfiable — the
/// caller should respond 416 with `Content-Range: bytes */total`.
pub fn parse_range_header(header: &str, total: u64) -> Result<Vec<ByteRange>, ()> {
    let spec = header.strip_prefix("bytes=").ok_or(())?;
    if total == 0 {
        return Err(());
    }

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        let (start_str, end_str) = part.split_once('-').ok_or(())?;

        let range = if start_str.is_empty() {
            // Suffix range: last N bytes.
            let n: u64 = end_str.parse().map_err(|_| ())?;
            if n == 0 {
                continue;
            }
            let n = n.min(total);
            ByteRange {
                start: total - n,
                end: total - 1,
            }
        } else {
            let start: u64 = start_str.parse().map_err(|_| ())?;
            if start >= total {
                continue;
            }
            let end = match end_str.is_empty() {
                true => total - 1,
                false => end_str.parse::<u64>().map_err(|_| ())?.min(total - 1),
            };
            if end < start {
                continue;
            }
            ByteRange { start, end }
        };
        ranges.push(range);
    }

    if ranges.is_empty() {
        Err(())
    } else {
        Ok(ranges)
    }
}

/// Builds a notice/error page, padding the body to `min_size` bytes with a
/// trailing HTML comment so that browsers which substitute their own
/// "friendly" error page for short bodies leave this one alone — mirrors
/// `server.errorminsize` in [`crate::config::ServerOptions`].
pub fn notice_page(
    status: StatusCode,
    detail: &str,
    min_size: usize,
    include_signature: bool,
) -> String {
    let mut page = format!(
        "<html><head><title>{} {}</title></head><body><h1>{} {}</h1><p>{}</p>",
        status.as_u16(),
        status.reason_phrase(),
        status.as_u16(),
        status.reason_phrase(),
        detail,
    );
    if include_signature {
        page.push_str("<hr><address>corehttpd</address>");
    }
    page.push_str("</body></html>");

    if page.len() < min_size {
        let pad = min_size - page.len();
        page.push_str("<!--");
        page.push_str(&" ".repeat(pad.saturating_sub(7)));
        page.push_str("-->");
    }
    page
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_body_serialize() {
        let mut resp = Response::new(Version::Http11);
        resp.status(StatusCode::Ok)
            .header("content-type", "text/plain");
        resp.body_str("hi");
        let bytes = resp.to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("content-length: 2\r\n\r\nhi"));
    }

    #[test]
    fn close_adds_connection_header_on_http11() {
        let mut resp = Response::new(Version::Http11);
        resp.status(StatusCode::Ok).close();
        resp.body_str("");
        assert!(resp
            .headers()
            .iter()
            .any(|(k, v)| k == "connection" && v == "close"));
    }

    #[test]
    fn http10_keepalive_adds_header() {
        let mut resp = Response::new(Version::Http10);
        resp.status(StatusCode::Ok);
        resp.body_str("");
        assert!(resp
            .headers()
            .iter()
            .any(|(k, v)| k == "connection" && v == "keep-alive"));
    }

    #[test]
    fn set_header_overwrites_previous_value() {
        let mut resp = Response::new(Version::Http11);
        resp.status(StatusCode::Ok);
        resp.set_header("x-id", "1");
        resp.set_header("x-id", "2");
        assert_eq!(
            resp.headers().iter().filter(|(k, _)| k == "x-id").count(),
            1
        );
        assert_eq!(resp.headers()[0].1, "2");
    }

    #[test]
    fn cond_set_header_keeps_first_value() {
        let mut resp = Response::new(Version::Http11);
        resp.status(StatusCode::Ok);
        resp.cond_set_header("x-id", "1");
        resp.cond_set_header("x-id", "2");
        assert_eq!(resp.headers()[0].1, "1");
    }

    #[test]
    fn append_header_joins_with_comma_space() {
        let mut resp = Response::new(Version::Http11);
        resp.status(StatusCode::Ok);
        resp.append_header("vary", "accept-encoding");
        resp.append_header("vary", "accept-language");
        assert_eq!(resp.headers()[0].1, "accept-encoding, accept-language");
    }

    #[test]
    fn embedded_newline_is_folded() {
        let mut resp = Response::new(Version::Http11);
        resp.status(StatusCode::Ok);
        resp.set_header("x-evil", "a\r\nSet-Cookie: evil=1");
        resp.body_str("");
        assert_eq!(resp.headers()[0].1, "a\n\tSet-Cookie: evil=1");
    }

    #[test]
    fn single_range_parsed() {
        let ranges = parse_range_header("bytes=0-99", 1000).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 99 }]);
    }

    #[test]
    fn suffix_range_clamped_to_total() {
        let ranges = parse_range_header("bytes=-50", 30).unwrap();
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 29 }]);
    }

    #[test]
    fn multi_range_parsed_in_order() {
        let ranges = parse_range_header("bytes=0-9,20-29", 100).unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1], ByteRange { start: 20, end: 29 });
    }

    #[test]
    fn out_of_bounds_range_rejected() {
        assert!(parse_range_header("bytes=500-600", 100).is_err());
    }

    #[test]
    fn notice_page_padded_to_minimum_size() {
        let page = notice_page(StatusCode::NotFound, "no such thing", 512, false);
        assert!(page.len() >= 512);
    }

    #[test]
    fn notice_page_untouched_when_already_long_enough() {
        let long_detail = "x".repeat(600);
        let page = notice_page(StatusCode::NotFound, &long_detail, 512, false);
        assert!(!page.contains("<!--"));
    }
}
