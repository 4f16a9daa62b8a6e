//! Core HTTP protocol types: methods, versions, and status codes.
//!
//! `Url` and header storage live in [`crate::router`] and
//! [`crate::driver::request`] respectively, since both now own their bytes
//! (see `DESIGN.md`'s note on dropping the teacher's `'static`-lifetime
//! zero-copy trick in favor of an owned buffer).

use crate::error::ParseError;

/// HTTP request methods.
///
/// # References
///
/// - [RFC 7231, Section 4](https://datatracker.ietf.org/doc/html/rfc7231#section-4)
/// - [RFC 5789](https://datatracker.ietf.org/doc/html/rfc5789) (PATCH method)
///
/// `TRACE` and `CONNECT` are not recognized; neither fits the embedded
/// request-handler model this server targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Post,
    Head,
    Patch,
    Delete,
    Options,
}

impl Method {
    #[inline]
    pub(crate) fn from_bytes(src: &[u8]) -> Result<(Self, usize), ParseError> {
        match src {
            [b'G', b'E', b'T', b' ', ..] => Ok((Method::Get, 3)),
            [b'P', b'U', b'T', b' ', ..] => Ok((Method::Put, 3)),
            [b'P', b'O', b'S', b'T', b' ', ..] => Ok((Method::Post, 4)),
            [b'H', b'E', b'A', b'D', b' ', ..] => Ok((Method::Head, 4)),
            [b'P', b'A', b'T', b'C', b'H', b' ', ..] => Ok((Method::Patch, 5)),
            [b'D', b'E', b'L', b'E', b'T', b'E', b' ', ..] => Ok((Method::Delete, 6)),
            [b'O', b'P', b'T', b'I', b'O', b'N', b'S', b' ', ..] => Ok((Method::Options, 7)),
            _ => Err(ParseError::InvalidMethod),
        }
    }

    /// The method name as it appears on the wire, used for the router's
    /// sequence encoding (see `crate::router::encode_sequence`).
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

/// HTTP protocol version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Version {
    /// HTTP/0.9 — request line only, no headers, response is the raw body.
    Http09,
    /// HTTP/1.0 — [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// HTTP/1.1 — [RFC 7230](https://tools.ietf.org/html/rfc7230) and related
    Http11,
}

impl Version {
    #[inline]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<Self, ParseError> {
        match src {
            b"HTTP/1.1" => Ok(Self::Http11),
            b"HTTP/1.0" => Ok(Self::Http10),
            _ => Err(ParseError::UnsupportedVersion),
        }
    }

    /// Whether this version defaults to persistent connections absent an
    /// explicit `Connection` header (true from 1.1 onward).
    pub const fn keepalive_by_default(&self) -> bool {
        matches!(self, Version::Http11)
    }
}

macro_rules! set_status_codes {
    ($(
        $(#[$docs:meta])+
        $name:ident = ($num:expr, $str:expr);
    )+) => {
        /// HTTP status codes, per
        /// [RFC 9110 §15](https://datatracker.ietf.org/doc/html/rfc9110#section-15).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StatusCode { $(
            #[doc = concat!(stringify!($num), " ", $str)]
            $(#[$docs])+
            $name = $num,
        )+ }

        impl StatusCode {
            /// The numeric status code.
            pub const fn as_u16(&self) -> u16 {
                match self { $( StatusCode::$name => $num, )+ }
            }

            /// The reason phrase, e.g. `"Not Found"`.
            pub const fn reason_phrase(&self) -> &'static str {
                match self { $( StatusCode::$name => $str, )+ }
            }

            /// The status line for the given version, e.g.
            /// `b"HTTP/1.1 404 Not Found\r\n"`. HTTP/0.9 has no status line.
            pub(crate) const fn status_line(&self, version: Version) -> &'static [u8] {
                match (self, version) { $(
                    (StatusCode::$name, Version::Http11) => {
                        concat!("HTTP/1.1 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http10) => {
                        concat!("HTTP/1.0 ", $num, " ", $str, "\r\n").as_bytes()
                    },
                    (StatusCode::$name, Version::Http09) => b"",
                )+ }
            }
        }
    }
}

set_status_codes! {
    /// [RFC9110 §15.2.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.2.1)
    Continue = (100, "Continue");
    /// [RFC9110 §15.2.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.2.2)
    SwitchingProtocols = (101, "Switching Protocols");

    /// [RFC9110 §15.3.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.1)
    Ok = (200, "OK");
    /// [RFC9110 §15.3.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.2)
    Created = (201, "Created");
    /// [RFC9110 §15.3.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.3)
    Accepted = (202, "Accepted");
    /// [RFC9110 §15.3.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.5)
    NoContent = (204, "No Content");
    /// [RFC9110 §15.3.7](https://datatracker.ietf.org/doc/html/rfc9110#section-15.3.7)
    PartialContent = (206, "Partial Content");

    /// [RFC9110 §15.4.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.1)
    MultipleChoices = (300, "Multiple Choices");
    /// [RFC9110 §15.4.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.2)
    MovedPermanently = (301, "Moved Permanently");
    /// [RFC9110 §15.4.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.3)
    Found = (302, "Found");
    /// [RFC9110 §15.4.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.5)
    NotModified = (304, "Not Modified");
    /// [RFC9110 §15.4.7](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.7)
    TemporaryRedirect = (307, "Temporary Redirect");
    /// [RFC9110 §15.4.8](https://datatracker.ietf.org/doc/html/rfc9110#section-15.4.8)
    PermanentRedirect = (308, "Permanent Redirect");

    /// [RFC9110 §15.5.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.1)
    BadRequest = (400, "Bad Request");
    /// [RFC9110 §15.5.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.2)
    Unauthorized = (401, "Unauthorized");
    /// [RFC9110 §15.5.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.4)
    Forbidden = (403, "Forbidden");
    /// [RFC9110 §15.5.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.5)
    NotFound = (404, "Not Found");
    /// [RFC9110 §15.5.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.6)
    MethodNotAllowed = (405, "Method Not Allowed");
    /// [RFC9110 §15.5.9](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.9)
    RequestTimeout = (408, "Request Timeout");
    /// [RFC9110 §15.5.10](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.10)
    Conflict = (409, "Conflict");
    /// [RFC9110 §15.5.12](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.12)
    LengthRequired = (411, "Length Required");
    /// [RFC9110 §15.5.14](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.14)
    PayloadTooLarge = (413, "Payload Too Large");
    /// [RFC9110 §15.5.15](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.15)
    UriTooLong = (414, "URI Too Long");
    /// [RFC9110 §15.5.17](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.17)
    RangeNotSatisfiable = (416, "Range Not Satisfiable");
    /// [RFC9110 §15.5.18](https://datatracker.ietf.org/doc/html/rfc9110#section-15.5.18)
    ExpectationFailed = (417, "Expectation Failed");
    /// [RFC6585 §3](https://datatracker.ietf.org/doc/html/rfc6585#section-3)
    PreconditionRequired = (428, "Precondition Required");
    /// [RFC6585 §4](https://datatracker.ietf.org/doc/html/rfc6585#section-4)
    TooManyRequests = (429, "Too Many Requests");
    /// [RFC6585 §5](https://datatracker.ietf.org/doc/html/rfc6585#section-5)
    RequestHeaderFieldsTooLarge = (431, "Request Header Fields Too Large");

    /// [RFC9110 §15.6.1](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.1)
    InternalServerError = (500, "Internal Server Error");
    /// [RFC9110 §15.6.2](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.2)
    NotImplemented = (501, "Not Implemented");
    /// [RFC9110 §15.6.3](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.3)
    BadGateway = (502, "Bad Gateway");
    /// [RFC9110 §15.6.4](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.4)
    ServiceUnavailable = (503, "Service Unavailable");
    /// [RFC9110 §15.6.5](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.5)
    GatewayTimeout = (504, "Gateway Timeout");
    /// [RFC9110 §15.6.6](https://datatracker.ietf.org/doc/html/rfc9110#section-15.6.6)
    HttpVersionNotSupported = (505, "HTTP Version Not Supported");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_with_trailing_space_excluded() {
        let (m, len) = Method::from_bytes(b"GET /foo HTTP/1.1\r\n").unwrap();
        assert_eq!(m, Method::Get);
        assert_eq!(len, 3);
    }

    #[test]
    fn unknown_method_rejected() {
        assert_eq!(Method::from_bytes(b"TRACE / HTTP/1.1\r\n"), Err(ParseError::InvalidMethod));
    }

    #[test]
    fn status_line_omitted_for_http_09() {
        assert_eq!(StatusCode::Ok.status_line(Version::Http09), b"" as &[u8]);
        assert_eq!(
            StatusCode::NotFound.status_line(Version::Http11),
            b"HTTP/1.1 404 Not Found\r\n" as &[u8]
        );
    }
}
