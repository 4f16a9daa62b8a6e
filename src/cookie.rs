//! Cookie header parsing/synthesis and HTTP `Authorization` parsing (C12).
//!
//! Grounded in `examples/original_source/nsd/cookies.c` (cookie search and
//! `Set-Cookie` attribute set), `examples/original_source/nsd/auth.c`
//! (Basic/Digest `Authorization` parsing), and
//! `examples/original_source/nsd/uuencode.c` (the base64 alphabet, used
//! here only for decoding `Basic` credentials — nothing in this crate
//! needs uuencoding proper).

use crate::error::ParseError;

/// Parses a `Cookie` request header into `(name, value)` pairs, in the
/// order they appeared. Values are not URL-decoded; callers that expect
/// percent-encoded cookie values should decode them explicitly.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"');
            Some((name.to_string(), value.to_string()))
        })
        .collect()
}

/// `SameSite` attribute for a `Set-Cookie` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Attributes for a single outgoing cookie, mirroring the options
/// `Ns_ConnSetCookieEx` accepts.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

/// Builds a `Set-Cookie` header value. `name`/`value` are written as-is;
/// callers are responsible for percent-encoding a value that might
/// otherwise contain `;` or `,`.
pub fn build_set_cookie(name: &str, value: &str, opts: &CookieOptions) -> String {
    let mut out = format!("{name}={value}");
    if let Some(path) = &opts.path {
        out.push_str("; Path=");
        out.push_str(path);
    }
    if let Some(domain) = &opts.domain {
        out.push_str("; Domain=");
        out.push_str(domain);
    }
    if let Some(max_age) = opts.max_age {
        out.push_str("; Max-Age=");
        out.push_str(&max_age.to_string());
    }
    if opts.secure {
        out.push_str("; Secure");
    }
    if opts.http_only {
        out.push_str("; HttpOnly");
    }
    match opts.same_site {
        Some(SameSite::Strict) => out.push_str("; SameSite=Strict"),
        Some(SameSite::Lax) => out.push_str("; SameSite=Lax"),
        Some(SameSite::None) => out.push_str("; SameSite=None"),
        None => {}
    }
    out
}

/// Credentials extracted from an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { user: String, password: String },
    /// Digest auth is parsed into its raw parameter map; validating a
    /// digest response against a nonce/realm is a handler concern, not
    /// this module's.
    Digest(Vec<(String, String)>),
}

/// Parses an `Authorization` header value (`"Basic <base64>"` or
/// `"Digest <params>"`).
pub fn parse_authorization(header: &str) -> Result<Credentials, ParseError> {
    let (scheme, rest) = header.split_once(' ').ok_or(ParseError::InvalidAuthHeader)?;
    match scheme.to_ascii_lowercase().as_str() {
        "basic" => {
            let decoded = base64_decode(rest.trim()).ok_or(ParseError::InvalidAuthHeader)?;
            let decoded = String::from_utf8(decoded).map_err(|_| ParseError::InvalidAuthHeader)?;
            let (user, password) = decoded
                .split_once(':')
                .ok_or(ParseError::InvalidAuthHeader)?;
            Ok(Credentials::Basic {
                user: user.to_string(),
                password: password.to_string(),
            })
        }
        "digest" => {
            let params = rest
                .split(',')
                .filter_map(|kv| {
                    let kv = kv.trim();
                    let (k, v) = kv.split_once('=')?;
                    Some((k.trim().to_string(), v.trim().trim_matches('"').to_string()))
                })
                .collect();
            Ok(Credentials::Digest(params))
        }
        _ => Err(ParseError::InvalidAuthHeader),
    }
}

const SIX2PR: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Encodes `data` as standard base64 with `=` padding, per the six-bit
/// alphabet in `uuencode.c`'s `six2pr` table.
pub fn base64_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied();
        let b2 = chunk.get(2).copied();

        out.push(SIX2PR[(b0 >> 2) as usize] as char);
        out.push(SIX2PR[((b0 & 0x03) << 4 | b1.unwrap_or(0) >> 4) as usize] as char);
        out.push(match b1 {
            Some(b1) => SIX2PR[((b1 & 0x0F) << 2 | b2.unwrap_or(0) >> 6) as usize] as char,
            None => '=',
        });
        out.push(match b2 {
            Some(b2) => SIX2PR[(b2 & 0x3F) as usize] as char,
            None => '=',
        });
    }
    out
}

fn pr2six(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'+' => Some(62),
        b'/' => Some(63),
        _ => None,
    }
}

/// Decodes standard base64. Returns `None` on any non-alphabet,
/// non-padding byte, matching `pr2six`'s `-1`-means-invalid table.
pub fn base64_decode(input: &str) -> Option<Vec<u8>> {
    let bytes: Vec<u8> = input.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(bytes.len() / 4 * 3);
    for chunk in bytes.chunks(4) {
        let pad = chunk.iter().filter(|&&b| b == b'=').count();
        let vals: Vec<u8> = chunk
            .iter()
            .take(4 - pad)
            .map(|&b| pr2six(b))
            .collect::<Option<_>>()?;
        if vals.is_empty() {
            return None;
        }
        let mut buf = [0u8; 4];
        buf[..vals.len()].copy_from_slice(&vals);
        out.push((buf[0] << 2) | (buf[1] >> 4));
        if vals.len() > 2 {
            out.push((buf[1] << 4) | (buf[2] >> 2));
        }
        if vals.len() > 3 {
            out.push((buf[2] << 6) | buf[3]);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_cookies() {
        let cookies = parse_cookie_header("session=abc123; theme=dark; empty=\"\"");
        assert_eq!(
            cookies,
            vec![
                ("session".into(), "abc123".into()),
                ("theme".into(), "dark".into()),
                ("empty".into(), "".into()),
            ]
        );
    }

    #[test]
    fn set_cookie_includes_requested_attributes() {
        let opts = CookieOptions {
            path: Some("/".into()),
            secure: true,
            http_only: true,
            same_site: Some(SameSite::Lax),
            ..Default::default()
        };
        let header = build_set_cookie("session", "abc123", &opts);
        assert_eq!(
            header,
            "session=abc123; Path=/; Secure; HttpOnly; SameSite=Lax"
        );
    }

    #[test]
    fn base64_round_trips() {
        for input in [&b""[..], b"f", b"fo", b"foo", b"foob", b"fooba", b"foobar"] {
            let encoded = base64_encode(input);
            assert_eq!(base64_decode(&encoded).unwrap(), input);
        }
    }

    #[test]
    fn base64_known_vector() {
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn parses_basic_auth_header() {
        let header = format!("Basic {}", base64_encode(b"alice:hunter2"));
        let creds = parse_authorization(&header).unwrap();
        assert_eq!(
            creds,
            Credentials::Basic {
                user: "alice".into(),
                password: "hunter2".into(),
            }
        );
    }

    #[test]
    fn parses_digest_auth_params() {
        let creds =
            parse_authorization(r#"Digest username="bob", realm="test", nonce="abc""#).unwrap();
        match creds {
            Credentials::Digest(params) => {
                assert!(params.contains(&("username".to_string(), "bob".to_string())));
                assert!(params.contains(&("realm".to_string(), "test".to_string())));
            }
            _ => panic!("expected digest credentials"),
        }
    }
}
