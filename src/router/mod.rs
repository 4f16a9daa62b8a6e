//! URL-space routing (C4, C11): a trie of method+path segments, split
//! across channels by a glob over the URL's last path segment only,
//! supporting inheriting and non-inheriting data slots.
//!
//! Grounded in `examples/original_source/nsd/urlspace.c`. The original
//! structure is `Junction{byname, byuse} -> Channel{filter, trie} ->
//! Trie{branches, node} -> Branch{word, trie}`; `byname`/`byuse` were two
//! indexes over the same channel set kept in different orders. Per
//! `DESIGN.md`'s Open Question #1, only one channel list is kept, since
//! nothing observable depends on lexicographic order — specificity is
//! resolved at lookup time by comparing the depth each channel's match
//! was found at (`JunctionFind`), not by the list's order.
//!
//! A `Channel`'s filter is the glob pattern for the *last path segment*
//! only (`*.html`), never the method — `/foo/bar/*.html` registers under
//! channel `"*.html"` with a trie holding just `method/foo/bar`; any
//! registration whose last segment isn't a glob lands under the implicit
//! `"*"` channel instead, keeping its full `method/path` sequence as
//! ordinary trie branches (`JunctionAdd`). The method itself is just the
//! first branch word of that trie, so a wildcard method (`"*"`) is
//! handled the same way any other glob branch is.

use std::collections::HashMap;

/// Whether a value is visible to requests under child path segments too
/// (`Ns_UrlSpecificSet`'s `inherit` flag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Visible at this exact path and every path beneath it.
    Inherit,
    /// Visible only at this exact path.
    Exact,
}

/// A lookup result: the stored value, plus whether it was found via
/// inheritance from an ancestor segment rather than an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'a, T> {
    pub value: &'a T,
    pub inherited: bool,
}

/// Splits a request method + path into the sequence the trie is keyed on:
/// method first, then path segments with redundant slashes collapsed and
/// empty segments dropped. Mirrors `MkSeq` in the original source, minus
/// the NUL-delimited byte-buffer encoding (we keep owned `String`
/// segments instead of raw bytes, since nothing downstream needs the C
/// string layout).
pub fn encode_sequence(method: &str, path: &str) -> Vec<String> {
    let mut seq = Vec::with_capacity(8);
    seq.push(method.to_string());
    seq.extend(
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string),
    );
    seq
}

/// Minimal `*`/`?` glob matcher, used only for the final path segment and
/// for channel filters, per the spec's restriction that wildcards are
/// meaningful in the last segment only.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    glob_match_rec(&p, &t)
}

fn glob_match_rec(p: &[char], t: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('*') => {
            glob_match_rec(&p[1..], t) || (!t.is_empty() && glob_match_rec(p, &t[1..]))
        }
        Some('?') => !t.is_empty() && glob_match_rec(&p[1..], &t[1..]),
        Some(c) => t.first() == Some(c) && glob_match_rec(&p[1..], &t[1..]),
    }
}

struct Node<T> {
    data_inherit: Option<T>,
    data_no_inherit: Option<T>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            data_inherit: None,
            data_no_inherit: None,
        }
    }
}

struct Branch<T> {
    word: String,
    trie: Trie<T>,
}

#[derive(Default)]
struct Trie<T> {
    /// Literal (non-glob) child segments, looked up by exact word.
    literal: HashMap<String, Branch<T>>,
    /// Children whose word contains `*`/`?`; only ever populated at a
    /// leaf, since wildcards are meaningful only in the final segment.
    glob: Vec<Branch<T>>,
    node: Node<T>,
}

impl<T> Trie<T> {
    fn branch_mut(&mut self, word: &str) -> &mut Branch<T> {
        if word.contains('*') || word.contains('?') {
            if let Some(idx) = self.glob.iter().position(|b| b.word == word) {
                return &mut self.glob[idx];
            }
            self.glob.push(Branch {
                word: word.to_string(),
                trie: Trie::default(),
            });
            self.glob.last_mut().unwrap()
        } else {
            self.literal.entry(word.to_string()).or_insert_with(|| Branch {
                word: word.to_string(),
                trie: Trie::default(),
            })
        }
    }

    fn set(&mut self, segments: &[String], scope: Scope, data: T) {
        match segments.split_first() {
            None => match scope {
                Scope::Inherit => self.node.data_inherit = Some(data),
                Scope::Exact => self.node.data_no_inherit = Some(data),
            },
            Some((head, rest)) => self.branch_mut(head).trie.set(rest, scope, data),
        }
    }

    /// Exact walk used by `get_exact`/`get_fast`/`destroy`: literal
    /// lookups only, no glob fallback, no inheritance.
    fn find_exact(&self, segments: &[String]) -> Option<&Node<T>> {
        match segments.split_first() {
            None => Some(&self.node),
            Some((head, rest)) => self.literal.get(head).and_then(|b| b.trie.find_exact(rest)),
        }
    }

    fn find_exact_mut(&mut self, segments: &[String]) -> Option<&mut Node<T>> {
        match segments.split_first() {
            None => Some(&mut self.node),
            Some((head, rest)) => self
                .literal
                .get_mut(head)
                .and_then(|b| b.trie.find_exact_mut(rest)),
        }
    }

    /// Deepest-match-wins walk used by `get`: prefers the literal child at
    /// each level, falling back to glob children only when no literal
    /// branch matches (e.g. a wildcard method registration). Tracks the
    /// last inheriting node seen along the way so an ancestor's `Inherit`
    /// data is visible to descendants with no data of their own, and
    /// returns the depth the match was found at so callers comparing
    /// candidates across channels can prefer the more specific one.
    fn find_deepest<'a>(&'a self, segments: &[String], depth: usize) -> Option<(&'a T, bool, usize)> {
        let mut best: Option<(&'a T, bool, usize)> = None;
        if let Some(data) = &self.node.data_inherit {
            best = Some((data, !segments.is_empty(), depth));
        }
        if segments.is_empty() {
            if let Some(data) = &self.node.data_no_inherit {
                best = Some((data, false, depth));
            }
            return best;
        }

        let (head, rest) = segments.split_first().unwrap();
        if let Some(branch) = self.literal.get(head) {
            if let Some(candidate) = branch.trie.find_deepest(rest, depth + 1) {
                best = Some(candidate);
            }
        } else {
            for branch in &self.glob {
                if !glob_match(&branch.word, head) {
                    continue;
                }
                if let Some(candidate) = branch.trie.find_deepest(rest, depth + 1) {
                    if best.as_ref().map_or(true, |(_, _, d)| candidate.2 > *d) {
                        best = Some(candidate);
                    }
                }
            }
        }
        best
    }

    fn delete(&mut self, segments: &[String], scope: Scope) -> bool {
        match segments.split_first() {
            None => {
                match scope {
                    Scope::Inherit => self.node.data_inherit = None,
                    Scope::Exact => self.node.data_no_inherit = None,
                }
                self.node.data_inherit.is_none() && self.node.data_no_inherit.is_none()
            }
            Some((head, rest)) => {
                let word = head.clone();
                let (is_glob, empty_child) = if word.contains('*') || word.contains('?') {
                    if let Some(idx) = self.glob.iter().position(|b| b.word == word) {
                        let empty = self.glob[idx].trie.delete(rest, scope);
                        (true, empty)
                    } else {
                        return false;
                    }
                } else if let Some(branch) = self.literal.get_mut(&word) {
                    (false, branch.trie.delete(rest, scope))
                } else {
                    return false;
                };
                if empty_child {
                    if is_glob {
                        self.glob.retain(|b| b.word != word);
                    } else {
                        self.literal.remove(&word);
                    }
                }
                self.literal.is_empty()
                    && self.glob.is_empty()
                    && self.node.data_inherit.is_none()
                    && self.node.data_no_inherit.is_none()
            }
        }
    }
}

struct Channel<T> {
    /// A glob over the URL's *last path segment only* (e.g. `*.html`), or
    /// the literal `"*"` catch-all filter every non-wildcard registration
    /// falls into. Never a method — the method is just the first branch
    /// level of the channel's own trie (`JunctionAdd`/`JunctionFind`).
    filter: String,
    trie: Trie<T>,
}

/// A generic URL-space: `set`/`get`/`get_fast`/`get_exact`/`unset`, keyed
/// by a channel whose filter is the glob over the final path segment
/// (`*.html`, `*.css`, ...), with the request method folded into the
/// first branch level of each channel's trie.
///
/// One `UrlSpace<T>` corresponds to one `Ns_UrlSpecificAlloc` id in the
/// original; callers that need several independent routing tables (one
/// for handlers, one for per-URL config, ...) create one instance each.
pub struct UrlSpace<T> {
    channels: Vec<Channel<T>>,
}

impl<T> Default for UrlSpace<T> {
    fn default() -> Self {
        Self { channels: Vec::new() }
    }
}

/// True when `segment` carries glob metacharacters and can therefore act
/// as a channel filter (`JunctionAdd`'s "last element has a wildcard"
/// check). The implicit filter for every other registration is `"*"`.
fn is_glob_segment(segment: &str) -> bool {
    segment.contains('*') || segment.contains('?')
}

impl<T> UrlSpace<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel_mut(&mut self, filter: &str) -> &mut Channel<T> {
        if let Some(idx) = self.channels.iter().position(|c| c.filter == filter) {
            return &mut self.channels[idx];
        }
        self.channels.push(Channel {
            filter: filter.to_string(),
            trie: Trie::default(),
        });
        self.channels.last_mut().unwrap()
    }

    /// Splits `method`/`path` into a full sequence (method first, then
    /// path segments) and, if the last segment is a glob, the filter it
    /// belongs under. Mirrors `JunctionAdd`'s depth/wildcard check: a
    /// glob last segment is pulled out of the sequence entirely and
    /// becomes the channel filter instead of a trie branch; anything else
    /// keeps its full sequence under the implicit `"*"` filter.
    fn split_filter(seq: &mut Vec<String>) -> String {
        if seq.len() > 1 && is_glob_segment(seq.last().unwrap()) {
            seq.pop().unwrap()
        } else {
            "*".to_string()
        }
    }

    /// Registers `data` for `method`/`path`. `Scope::Inherit` makes it
    /// visible to every path beneath this one that has no closer match of
    /// its own.
    pub fn set(&mut self, method: &str, path: &str, scope: Scope, data: T) {
        let mut seq = encode_sequence(method, path);
        let filter = Self::split_filter(&mut seq);
        self.channel_mut(&filter).trie.set(&seq, scope, data);
    }

    /// Full lookup: checks every channel whose filter matches the
    /// request's last path segment (literal `"*"` or a glob such as
    /// `*.html`), and returns whichever candidate matched at the greatest
    /// depth — i.e. the most specific one (`JunctionFind`).
    pub fn get(&self, method: &str, path: &str) -> Option<Match<'_, T>> {
        let seq = encode_sequence(method, path);
        let last = (seq.len() > 1).then(|| seq.last().unwrap().as_str());

        let mut best: Option<(&T, bool, usize)> = None;
        for channel in &self.channels {
            let channel_matches = match last {
                Some(segment) => glob_match(&channel.filter, segment),
                None => channel.filter == "*",
            };
            if !channel_matches {
                continue;
            }
            let walk: &[String] = if channel.filter == "*" { &seq } else { &seq[..seq.len() - 1] };
            if let Some(candidate) = channel.trie.find_deepest(walk, 0) {
                if best.as_ref().map_or(true, |(_, _, d)| candidate.2 > *d) {
                    best = Some(candidate);
                }
            }
        }
        best.map(|(value, inherited, _)| Match { value, inherited })
    }

    /// Literal-only lookup: exact method, exact path, no inheritance, no
    /// glob matching anywhere. For hot paths that only ever register exact
    /// routes under the catch-all `"*"` filter.
    pub fn get_fast(&self, method: &str, path: &str) -> Option<&T> {
        let seq = encode_sequence(method, path);
        let channel = self.channels.iter().find(|c| c.filter == "*")?;
        channel
            .trie
            .find_exact(&seq)
            .and_then(|n| n.data_no_inherit.as_ref().or(n.data_inherit.as_ref()))
    }

    /// Like [`UrlSpace::get_fast`] but also matches a glob channel filter
    /// against the last path segment (still requires the rest of the path
    /// to be an exact literal match, and never inherits).
    pub fn get_exact(&self, method: &str, path: &str) -> Option<&T> {
        let seq = encode_sequence(method, path);
        let last = (seq.len() > 1).then(|| seq.last().unwrap().as_str());
        for channel in &self.channels {
            let channel_matches = match last {
                Some(segment) => glob_match(&channel.filter, segment),
                None => channel.filter == "*",
            };
            if !channel_matches {
                continue;
            }
            let walk: &[String] = if channel.filter == "*" { &seq } else { &seq[..seq.len() - 1] };
            if let Some(n) = channel.trie.find_exact(walk) {
                if let Some(data) = n.data_no_inherit.as_ref().or(n.data_inherit.as_ref()) {
                    return Some(data);
                }
            }
        }
        None
    }

    /// Returns a mutable reference to the data at an exact method/path/
    /// scope, if any is registered there (no inheritance, no glob).
    pub fn get_exact_mut(&mut self, method: &str, path: &str, scope: Scope) -> Option<&mut T> {
        let mut seq = encode_sequence(method, path);
        let filter = Self::split_filter(&mut seq);
        let channel = self.channels.iter_mut().find(|c| c.filter == filter)?;
        let node = channel.trie.find_exact_mut(&seq)?;
        match scope {
            Scope::Inherit => node.data_inherit.as_mut(),
            Scope::Exact => node.data_no_inherit.as_mut(),
        }
    }

    /// Removes the value registered at an exact method/path/scope.
    /// Returns `true` if something was removed.
    pub fn unset(&mut self, method: &str, path: &str, scope: Scope) -> bool {
        let mut seq = encode_sequence(method, path);
        let filter = Self::split_filter(&mut seq);
        let Some(idx) = self.channels.iter().position(|c| c.filter == filter) else {
            return false;
        };
        let channel = &mut self.channels[idx];
        let existed = channel
            .trie
            .find_exact(&seq)
            .map(|n| match scope {
                Scope::Inherit => n.data_inherit.is_some(),
                Scope::Exact => n.data_no_inherit.is_some(),
            })
            .unwrap_or(false);
        channel.trie.delete(&seq, scope);
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_beats_inherited_ancestor() {
        let mut space: UrlSpace<&'static str> = UrlSpace::new();
        space.set("GET", "/api", Scope::Inherit, "api-handler");
        space.set("GET", "/api/users", Scope::Exact, "users-handler");

        assert_eq!(space.get("GET", "/api/users/123").unwrap().value, &"api-handler");
        assert!(space.get("GET", "/api/users/123").unwrap().inherited);

        let m = space.get("GET", "/api/users").unwrap();
        assert_eq!(m.value, &"users-handler");
        assert!(!m.inherited);
    }

    #[test]
    fn wildcard_channel_matches_any_method_but_loses_to_literal() {
        let mut space: UrlSpace<&'static str> = UrlSpace::new();
        space.set("*", "/ping", Scope::Exact, "any-method");
        space.set("GET", "/ping", Scope::Exact, "get-only");

        assert_eq!(space.get("POST", "/ping").unwrap().value, &"any-method");
        assert_eq!(space.get("GET", "/ping").unwrap().value, &"get-only");
    }

    #[test]
    fn wildcard_final_segment_matches() {
        let mut space: UrlSpace<&'static str> = UrlSpace::new();
        space.set("GET", "/static/*.css", Scope::Exact, "css-handler");

        assert_eq!(space.get("GET", "/static/app.css").unwrap().value, &"css-handler");
        assert!(space.get("GET", "/static/sub/app.css").is_none());
    }

    #[test]
    fn get_fast_ignores_inherited_and_glob() {
        let mut space: UrlSpace<&'static str> = UrlSpace::new();
        space.set("GET", "/a", Scope::Inherit, "a-handler");
        assert!(space.get_fast("GET", "/a/b").is_none());
        assert_eq!(space.get_fast("GET", "/a").unwrap(), &"a-handler");
    }

    #[test]
    fn unset_removes_exact_entry() {
        let mut space: UrlSpace<&'static str> = UrlSpace::new();
        space.set("GET", "/x", Scope::Exact, "x-handler");
        assert!(space.unset("GET", "/x", Scope::Exact));
        assert!(space.get_exact("GET", "/x").is_none());
        assert!(!space.unset("GET", "/x", Scope::Exact));
    }

    #[test]
    fn redundant_slashes_collapse() {
        assert_eq!(
            encode_sequence("GET", "//api//users/"),
            vec!["GET".to_string(), "api".to_string(), "users".to_string()]
        );
    }
}
