//! Error taxonomy for the server core.
//!
//! Every kind here corresponds to one of the error classes in the design's
//! error-handling section: parse errors, size-limit violations, timeouts,
//! handler failures, filter-chain failures, auth failures, backend
//! unavailability, and transport errors. Fatal primitive failures (mutex,
//! condvar, thread-spawn, `poll`) are not represented as a variant here —
//! they never become a `Result`, they abort via [`crate::sync::fatal`].

use crate::http::types::Version;
use std::io;

/// The unified error type returned by fallible core APIs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request line, header block, cookie, or auth header.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Request body or header block exceeded a configured limit.
    #[error("size limit exceeded: {0}")]
    SizeLimit(&'static str),

    /// A connection, pool acquisition, or job exceeded its deadline.
    #[error("timed out waiting on {0}")]
    Timeout(&'static str),

    /// The request handler returned an error disposition or panicked.
    #[error("handler error: {0}")]
    Handler(String),

    /// A filter in the pre-auth/post-auth/trace chain returned `ERROR`.
    #[error("filter chain error: {0}")]
    FilterChain(String),

    /// Credentials were absent, malformed, or rejected.
    #[error("authorization failed ({0})")]
    Auth(AuthFailure),

    /// A named-resource pool (DB handles, job queue) could not satisfy a
    /// request before its deadline, or a writer queue was full.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(&'static str),

    /// A socket-level I/O failure. Terminal for the connection.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Authorization failure sub-kind, distinguishing "might succeed with
/// different credentials" (401) from "can never succeed" (403).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("credentials missing or rejected, retry possible")]
    Unauthorized,
    #[error("no credentials could satisfy this resource")]
    Forbidden,
}

/// Parse-time failures, kept distinct from the top-level [`Error`] so
/// request parsing can work with a narrow `Result` type internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid request method")]
    InvalidMethod,
    #[error("invalid request URL")]
    InvalidUrl,
    #[error("unsupported or malformed HTTP version")]
    InvalidVersion,
    #[error("request used a protocol version this server does not support")]
    UnsupportedVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("header block exceeded the configured header count")]
    TooManyHeaders,
    #[error("header line exceeded the configured maximum length")]
    HeaderLineTooLong,
    #[error("invalid Content-Length header")]
    InvalidContentLength,
    #[error("invalid Connection header")]
    InvalidConnection,
    #[error("chunked transfer-encoding body was malformed")]
    InvalidChunkedBody,
    #[error("malformed Range header")]
    InvalidRange,
    #[error("requested range could not be satisfied")]
    RangeNotSatisfiable,
    #[error("malformed cookie header")]
    InvalidCookie,
    #[error("malformed Authorization header")]
    InvalidAuthHeader,
}

impl Error {
    /// Maps this error onto the status code the connection should respond
    /// with, per the design's "User-visible behaviour" section. Returns
    /// `None` for transport errors, which never get an HTTP response.
    pub fn status_code(&self) -> Option<crate::http::types::StatusCode> {
        use crate::http::types::StatusCode as S;
        Some(match self {
            Error::Parse(ParseError::RangeNotSatisfiable) => S::RangeNotSatisfiable,
            Error::Parse(_) => S::BadRequest,
            Error::SizeLimit(_) => S::BadRequest,
            Error::Timeout(_) => S::ServiceUnavailable,
            Error::Handler(_) | Error::FilterChain(_) => S::InternalServerError,
            Error::Auth(AuthFailure::Unauthorized) => S::Unauthorized,
            Error::Auth(AuthFailure::Forbidden) => S::Forbidden,
            Error::BackendUnavailable(_) => S::ServiceUnavailable,
            Error::Transport(_) => return None,
        })
    }

    /// Short machine-readable code, used by [`crate::response::Response::
    /// return_notice`] and JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Parse(ParseError::InvalidMethod) => "INVALID_METHOD",
            Error::Parse(ParseError::InvalidUrl) => "INVALID_URL",
            Error::Parse(ParseError::InvalidVersion) => "INVALID_VERSION",
            Error::Parse(ParseError::UnsupportedVersion) => "UNSUPPORTED_VERSION",
            Error::Parse(ParseError::InvalidHeader) => "INVALID_HEADER",
            Error::Parse(ParseError::TooManyHeaders) => "TOO_MANY_HEADERS",
            Error::Parse(ParseError::HeaderLineTooLong) => "HEADER_TOO_LONG",
            Error::Parse(ParseError::InvalidContentLength) => "INVALID_CONTENT_LENGTH",
            Error::Parse(ParseError::InvalidConnection) => "INVALID_CONNECTION",
            Error::Parse(ParseError::InvalidChunkedBody) => "INVALID_CHUNKED_BODY",
            Error::Parse(ParseError::InvalidRange) => "INVALID_RANGE",
            Error::Parse(ParseError::RangeNotSatisfiable) => "RANGE_NOT_SATISFIABLE",
            Error::Parse(ParseError::InvalidCookie) => "INVALID_COOKIE",
            Error::Parse(ParseError::InvalidAuthHeader) => "INVALID_AUTH_HEADER",
            Error::SizeLimit(_) => "SIZE_LIMIT_EXCEEDED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Handler(_) => "HANDLER_ERROR",
            Error::FilterChain(_) => "FILTER_ERROR",
            Error::Auth(AuthFailure::Unauthorized) => "UNAUTHORIZED",
            Error::Auth(AuthFailure::Forbidden) => "FORBIDDEN",
            Error::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Error::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// Whether headers can still safely be written for this error (i.e. it
    /// was detected before any response bytes went out).
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Reason phrase version clamp used throughout response synthesis:
/// NaviServer always replies with `min(request.version, HTTP/1.1)`.
pub fn clamp_version(v: Version) -> Version {
    match v {
        Version::Http09 => Version::Http09,
        Version::Http10 => Version::Http10,
        Version::Http11 => Version::Http11,
    }
}
