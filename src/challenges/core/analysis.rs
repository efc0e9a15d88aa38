//! Challenge page parsing helpers and utilities.
//!
//! Provides the low-level tag scanning used by the detector. Everything here
//! is a plain regex scan over the HTML text; no DOM is built.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use url::Url;

/// One HTML start tag with its attributes, names lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagAttributes {
    attributes: Vec<(String, String)>,
}

impl TagAttributes {
    /// First value of `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `name` attribute, falling back to `id` when `name` is absent.
    pub fn name_or_id(&self) -> Option<&str> {
        self.get("name").or_else(|| self.get("id"))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Collect every `<tag ...>` start tag of the given element name.
pub fn extract_tags(html: &str, tag: &str) -> Vec<TagAttributes> {
    let re = match tag.to_ascii_lowercase().as_str() {
        "input" => &*INPUT_TAG_RE,
        "form" => &*FORM_TAG_RE,
        other => return extract_with(html, &build_tag_regex(other)),
    };
    extract_with(html, re)
}

fn extract_with(html: &str, re: &Regex) -> Vec<TagAttributes> {
    re.captures_iter(html)
        .map(|caps| {
            let body = caps.get(1).or_else(|| caps.get(2));
            parse_attributes(body.map(|m| m.as_str()).unwrap_or(""))
        })
        .collect()
}

/// Tolerant attribute tokenizer.
///
/// Accepts double-quoted, single-quoted and unquoted values as well as bare
/// boolean attributes (stored with an empty value). Entities in values are
/// decoded.
pub fn parse_attributes(fragment: &str) -> TagAttributes {
    let attributes = ATTR_RE
        .captures_iter(fragment)
        .filter_map(|caps| {
            let name = caps.name("name")?.as_str().to_ascii_lowercase();
            let raw = caps
                .name("dq")
                .or_else(|| caps.name("sq"))
                .or_else(|| caps.name("uq"))
                .map(|m| m.as_str())
                .unwrap_or("");
            let value = html_escape::decode_html_entities(raw).into_owned();
            Some((name, value))
        })
        .collect();

    TagAttributes { attributes }
}

/// Build origin header value from URL (`scheme://host[:port]`).
pub fn origin_from_url(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or(""));
    if let Some(port) = url.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    origin
}

/// Re-home `url`'s path and query onto `origin`.
pub fn with_origin(url: &Url, origin: &str) -> Option<Url> {
    let base = Url::parse(origin).ok()?;
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    base.join(&path).ok()
}

/// Quoted values may contain `>`; a tag with a stray quote falls back to the
/// first `>`.
fn build_tag_regex(tag: &str) -> Regex {
    let pattern = format!(
        r#"<{}\b(?:((?:[^>"']|"[^"]*"|'[^']*')*)>|([^>]*)>)"#,
        regex::escape(tag)
    );
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid tag regex for `{tag}`: {err}"))
}

static INPUT_TAG_RE: Lazy<Regex> = Lazy::new(|| build_tag_regex("input"));

static FORM_TAG_RE: Lazy<Regex> = Lazy::new(|| build_tag_regex("form"));

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r#"(?P<name>[^\s"'<>/=]+)(?:\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<uq>[^\s"'=<>`]+)))?"#,
    )
    .dot_matches_new_line(true)
    .build()
    .expect("invalid attribute regex")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_all_quoting_styles() {
        let attrs = parse_attributes(r#" type="hidden" name='tok' value=T1 disabled data-x = "a&amp;b""#);
        assert_eq!(attrs.get("type"), Some("hidden"));
        assert_eq!(attrs.get("name"), Some("tok"));
        assert_eq!(attrs.get("value"), Some("T1"));
        assert_eq!(attrs.get("disabled"), Some(""));
        assert_eq!(attrs.get("data-x"), Some("a&b"));
    }

    #[test]
    fn self_closing_slash_is_not_an_attribute() {
        let tags = extract_tags(r#"<INPUT id="cha" value="x"/>"#, "input");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].len(), 2);
        assert_eq!(tags[0].name_or_id(), Some("cha"));
    }

    #[test]
    fn quoted_values_may_contain_angle_brackets() {
        let tags = extract_tags(
            r#"<input name="cha" value="a>b" data-note='x > y'><input name=red value=/next>"#,
            "input",
        );
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].get("value"), Some("a>b"));
        assert_eq!(tags[0].get("data-note"), Some("x > y"));
        assert_eq!(tags[1].get("value"), Some("/next"));
    }

    #[test]
    fn stray_quote_still_yields_the_tag() {
        let tags = extract_tags(r#"<input name=tok value=it's>"#, "input");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].get("name"), Some("tok"));
    }

    #[test]
    fn origin_keeps_explicit_port() {
        let url = Url::parse("http://127.0.0.1:8080/a/b?c=1").unwrap();
        assert_eq!(origin_from_url(&url), "http://127.0.0.1:8080");
        let moved = with_origin(&url, "https://www.example.com").unwrap();
        assert_eq!(moved.as_str(), "https://www.example.com/a/b?c=1");
    }

    #[test]
    fn does_not_match_longer_tag_names() {
        assert!(extract_tags("<inputs name=tok>", "input").is_empty());
        assert_eq!(extract_tags("<form>\n<formx>", "form").len(), 1);
    }
}
