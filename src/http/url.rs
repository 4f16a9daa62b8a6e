//! Parsed request target: path, segments, and query string.
//!
//! The teacher's `Url` borrows `&'static [u8]` slices carved out of a
//! request buffer via an `unsafe` lifetime extension (see
//! `examples/AmakeSashaDev-maker_web/src/http/request.rs`). This crate
//! owns its bytes instead — one extra allocation per request, traded for
//! dropping the `unsafe` entirely, per `DESIGN.md`'s note on that design
//! point.

use super::query::Query;

/// A parsed URL target (path + optional query string), owning its bytes.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Default)]
pub struct Url {
    target: String,
    path: String,
    segments: Vec<String>,
    query: Option<String>,
}

impl Url {
    /// Parses a request-line target such as `/api/users/123?sort=name`.
    pub fn parse(target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (target, None),
        };
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            target: target.to_string(),
            path: path.to_string(),
            segments,
            query,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn query_full(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Looks up a query parameter by name. Returns the first match, per
    /// the design's cookie/query lookup convention.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.query.as_ref()?;
        let params: Vec<(&[u8], &[u8])> = Query::parse(query.as_bytes(), usize::MAX).ok()?;
        params
            .into_iter()
            .find(|(k, _)| *k == key.as_bytes())
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_path_and_query() {
        let url = Url::parse("/api/users/123?sort=name&debug");
        assert_eq!(url.path(), "/api/users/123");
        assert_eq!(url.segments(), &["api", "users", "123"]);
        assert_eq!(url.query("sort").as_deref(), Some("name"));
        assert_eq!(url.query("debug").as_deref(), Some(""));
        assert_eq!(url.query("missing"), None);
    }

    #[test]
    fn path_without_query() {
        let url = Url::parse("/health");
        assert_eq!(url.path(), "/health");
        assert_eq!(url.query_full(), None);
    }
}
