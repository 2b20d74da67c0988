//! Route pattern compilation and matching.
//!
//! A pattern is split on `/` into a fixed sequence of segment matchers:
//! - a literal segment matches byte-for-byte (case-sensitive)
//! - `:name` matches exactly one non-empty segment and binds it to `name`
//! - a trailing `*` or `*name` absorbs the remainder of the path
//!
//! Matching is anchored and evaluated left to right; the first failing segment ends the
//! match. There is no backtracking.
//!
//! # Example
//! ```
//! use micro_dispatch::PathMatcher;
//!
//! let matcher = PathMatcher::compile("/users/:id");
//! let params = matcher.matches("/users/123").unwrap();
//! assert_eq!(params.get("id"), Some("123"));
//! assert!(matcher.matches("/users/123/x").is_none());
//! ```

use percent_encoding::percent_decode_str;
use std::borrow::Cow;

/// Binding name of an unnamed trailing wildcard.
pub const WILDCARD_PARAM: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    pattern: String,
    segments: Vec<Segment>,
}

impl PathMatcher {
    /// Compiles `pattern`. A wildcard that is not the last segment is kept as a literal.
    pub fn compile(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let raw_segments = split_segments(&pattern).collect::<Vec<_>>();
        let last = raw_segments.len().saturating_sub(1);

        let segments = raw_segments
            .iter()
            .enumerate()
            .map(|(index, raw)| match raw.as_bytes().first() {
                Some(b':') if raw.len() > 1 => Segment::Param(raw[1..].to_owned()),
                Some(b'*') if index == last => {
                    let name = if raw.len() > 1 { &raw[1..] } else { WILDCARD_PARAM };
                    Segment::Wildcard(name.to_owned())
                }
                _ => Segment::Literal((*raw).to_owned()),
            })
            .collect();

        Self { pattern, segments }
    }

    /// The pattern this matcher was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Tests `path` against the pattern, returning the bound parameters on success.
    ///
    /// Any query string is ignored, and a single trailing slash on the path is tolerated.
    pub fn matches(&self, path: &str) -> Option<ParamSet> {
        let path = strip_query(path);
        let mut params = ParamSet::empty();
        let mut rest = split_segments(path);

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if rest.next()? != literal.as_str() {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = rest.next().filter(|value| !value.is_empty())?;
                    params.insert(name.clone(), decode(value));
                }
                Segment::Wildcard(name) => {
                    let remainder = rest.collect::<Vec<_>>().join("/");
                    params.insert(name.clone(), decode(&remainder));
                    return Some(params);
                }
            }
        }

        rest.next().is_none().then_some(params)
    }
}

/// Removes everything from the first `?` onwards.
pub(crate) fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(path, _)| path)
}

/// Brings a mount or middleware prefix into the form `/a/b`; the root prefix becomes `""`.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() { String::new() } else { format!("/{trimmed}") }
}

/// Prepends a normalized `prefix` to `pattern`.
pub(crate) fn join(prefix: &str, pattern: &str) -> String {
    let pattern = pattern.trim_start_matches('/');
    match (prefix.is_empty(), pattern.is_empty()) {
        (true, _) => format!("/{pattern}"),
        (false, true) => prefix.to_owned(),
        (false, false) => format!("{prefix}/{pattern}"),
    }
}

/// Whether `path` lies under a normalized `prefix`, on a segment boundary.
pub(crate) fn has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Splits a path into segments, ignoring the leading slash and one trailing slash.
fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let empty = trimmed.is_empty();
    trimmed.split('/').filter(move |_| !empty)
}

fn decode(value: &str) -> String {
    match percent_decode_str(value).decode_utf8() {
        Ok(Cow::Borrowed(s)) => s.to_owned(),
        Ok(Cow::Owned(s)) => s,
        Err(_) => value.to_owned(),
    }
}

/// Ordered route parameters produced by a single match.
///
/// For example, matching `/users/:id` against `/users/42` yields `{id: "42"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSet {
    entries: Vec<(String, String)>,
}

impl ParamSet {
    /// Creates an empty `ParamSet`
    #[inline]
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Gets the value of a parameter by its name
    /// Returns None if the parameter doesn't exist
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.entries.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    /// Sets a parameter, replacing an existing value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParamSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = ParamSet::empty();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}
