//! Session cookie jar carried across one redirect/challenge sequence.

use std::collections::BTreeMap;

use http::HeaderMap;
use http::header::SET_COOKIE;

/// Name -> value cookie store, last write wins.
///
/// Owned by exactly one fetch-and-resolve chain; it is never shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Merge every `Set-Cookie` value of a response.
    ///
    /// Handles both multi-valued headers and a single comma-joined header.
    pub fn merge_response_headers(&mut self, headers: &HeaderMap) {
        let values = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok());
        self.merge(values);
    }

    /// Merge raw `Set-Cookie` header values into the jar.
    pub fn merge<'a, I>(&mut self, set_cookie_headers: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for header in set_cookie_headers {
            for entry in split_set_cookie(header) {
                if let Some((name, value)) = parse_pair(entry) {
                    self.cookies.insert(name.to_string(), value.to_string());
                }
            }
        }
    }

    /// Render the jar as a single `Cookie` header value (`a=1; b=2`).
    pub fn to_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let joined = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(joined)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Split a possibly comma-joined `Set-Cookie` value.
///
/// A comma only separates two cookies when the text after it starts a new
/// `name=` pair, so `Expires=Wed, 21 Oct 2015 ...` stays intact.
fn split_set_cookie(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;

    for (idx, ch) in header.char_indices() {
        if ch == ',' && starts_cookie_pair(&header[idx + 1..]) {
            parts.push(&header[start..idx]);
            start = idx + 1;
        }
    }
    parts.push(&header[start..]);

    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

fn starts_cookie_pair(rest: &str) -> bool {
    let rest = rest.trim_start();
    let name_len = rest
        .find(|c: char| c == '=' || c == ';' || c == ',' || c.is_whitespace())
        .unwrap_or(rest.len());
    name_len > 0 && rest[name_len..].starts_with('=')
}

fn parse_pair(entry: &str) -> Option<(&str, &str)> {
    let pair = entry.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}
