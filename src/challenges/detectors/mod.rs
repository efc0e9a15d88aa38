//! Challenge detection module.
//!
//! Recognises the proof-of-work challenge form by its hidden inputs. The scan
//! is a plain regex pass over the HTML and runs after every response of a
//! resolution chain, since challenges may be chained.

use once_cell::sync::Lazy;

use crate::challenges::core::{Challenge, TagAttributes, extract_tags};

/// Field and form names that identify the challenge form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeDetector {
    token_field: String,
    puzzle_field: String,
    redirect_field: String,
    form_name: String,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_DETECTOR: Lazy<ChallengeDetector> = Lazy::new(ChallengeDetector::new);

/// Parse a challenge with the default field names (`tok`, `cha`, `red`, form `sec`).
pub fn parse_challenge(html: &str) -> Option<Challenge> {
    DEFAULT_DETECTOR.detect(html)
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self {
            token_field: "tok".into(),
            puzzle_field: "cha".into(),
            redirect_field: "red".into(),
            form_name: "sec".into(),
        }
    }

    pub fn with_fields(
        mut self,
        token: impl Into<String>,
        puzzle: impl Into<String>,
        redirect: impl Into<String>,
    ) -> Self {
        self.token_field = token.into();
        self.puzzle_field = puzzle.into();
        self.redirect_field = redirect.into();
        self
    }

    pub fn with_form_name(mut self, form_name: impl Into<String>) -> Self {
        self.form_name = form_name.into();
        self
    }

    /// Returns `None` unless all three hidden fields are present.
    pub fn detect(&self, html: &str) -> Option<Challenge> {
        let inputs = extract_tags(html, "input");

        let token = field_value(&inputs, &self.token_field)?;
        let puzzle = field_value(&inputs, &self.puzzle_field)?;
        let redirect_target = field_value(&inputs, &self.redirect_field)?;

        Some(Challenge {
            token,
            puzzle,
            redirect_target,
            submit_action: self.submit_action(html),
        })
    }

    fn submit_action(&self, html: &str) -> Option<String> {
        let forms = extract_tags(html, "form");

        let named = forms.iter().find(|form| {
            [form.get("id"), form.get("name")]
                .into_iter()
                .flatten()
                .any(|value| value.eq_ignore_ascii_case(&self.form_name))
        });

        named
            .and_then(|form| form.get("action"))
            .or_else(|| forms.iter().find_map(|form| form.get("action")))
            .map(str::to_string)
    }
}

fn field_value(inputs: &[TagAttributes], field: &str) -> Option<String> {
    inputs
        .iter()
        .find(|input| {
            input
                .name_or_id()
                .is_some_and(|name| name.eq_ignore_ascii_case(field))
        })
        .map(|input| input.get("value").unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHALLENGE_PAGE: &str = r#"
        <html><head><title>禁止访问</title></head>
        <body>
            <form id="sec" method="POST" action="/c">
                <input type="hidden" name="tok" value="T1">
                <input type="hidden" name="cha" value="abc">
                <input type="hidden" name="sol" value="">
                <input type="hidden" name="red" value="https://movie.douban.com/subject/1292052/">
            </form>
        </body></html>
    "#;

    #[test]
    fn detects_double_quoted_challenge() {
        let challenge = parse_challenge(CHALLENGE_PAGE).expect("challenge");
        assert_eq!(challenge.token, "T1");
        assert_eq!(challenge.puzzle, "abc");
        assert_eq!(
            challenge.redirect_target,
            "https://movie.douban.com/subject/1292052/"
        );
        assert_eq!(challenge.submit_action.as_deref(), Some("/c"));
    }

    #[test]
    fn quoting_style_does_not_matter() {
        let single = "<input name='tok' value='T'><input name='cha' value='p'><input name='red' value='/r'>";
        let unquoted = "<input name=tok value=T><input name=cha value=p><input name=red value=/r>";
        let mixed = "<input NAME=\"TOK\" value=T><input id='cha' value=\"p\"><input name=red value='/r'/>";

        for html in [single, unquoted, mixed] {
            let challenge = parse_challenge(html).expect(html);
            assert_eq!(challenge.token, "T");
            assert_eq!(challenge.puzzle, "p");
            assert_eq!(challenge.redirect_target, "/r");
            assert_eq!(challenge.submit_action, None);
        }
    }

    #[test]
    fn missing_any_field_means_no_challenge() {
        let pages = [
            "<input name=tok value=T><input name=cha value=p>",
            "<input name=cha value=p><input name=red value=/r>",
            "<input name=tok value=T><input name=red value=/r>",
            "<html><body><h1>The Shawshank Redemption</h1></body></html>",
            "",
        ];
        for html in pages {
            assert_eq!(parse_challenge(html), None, "{html}");
        }
    }

    #[test]
    fn prefers_sec_form_action_over_first_form() {
        let html = r#"
            <form action="/search"></form>
            <form name="SEC" action="https://sec.example.com/c">
                <input name="tok" value="1"><input name="cha" value="2"><input name="red" value="3">
            </form>
        "#;
        let challenge = parse_challenge(html).unwrap();
        assert_eq!(
            challenge.submit_action.as_deref(),
            Some("https://sec.example.com/c")
        );
    }

    #[test]
    fn falls_back_to_first_form_with_action() {
        let html = r#"
            <form id="other"></form>
            <form action="/fallback">
                <input name="tok" value="1"><input name="cha" value="2"><input name="red" value="3">
            </form>
        "#;
        let challenge = parse_challenge(html).unwrap();
        assert_eq!(challenge.submit_action.as_deref(), Some("/fallback"));
    }

    #[test]
    fn custom_field_names() {
        let detector = ChallengeDetector::new()
            .with_fields("t", "c", "r")
            .with_form_name("gate");
        let html = "<form id=gate action=/verify><input name=t value=1><input name=c value=2><input name=r value=3>";
        let challenge = detector.detect(html).unwrap();
        assert_eq!(challenge.submit_action.as_deref(), Some("/verify"));
        assert!(parse_challenge(html).is_none());
    }
}
