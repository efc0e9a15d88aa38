//! Core data structures shared across challenge detection, analysis, and solving layers.

use url::Url;

use super::cookies::CookieJar;
use super::executor::ChallengeHttpResponse;

/// Proof-of-work challenge extracted from the hidden form of one response.
///
/// All fields are copied verbatim; none of them is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub token: String,
    pub puzzle: String,
    pub redirect_target: String,
    pub submit_action: Option<String>,
}

/// State threaded through the redirect and challenge loops.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub current_url: Url,
    pub response: ChallengeHttpResponse,
    pub cookie_jar: CookieJar,
}

impl FetchContext {
    pub fn new(current_url: Url, response: ChallengeHttpResponse, cookie_jar: CookieJar) -> Self {
        Self {
            current_url,
            response,
            cookie_jar,
        }
    }

    pub fn status(&self) -> u16 {
        self.response.status
    }

    pub fn body_text(&self) -> String {
        self.response.text()
    }
}

/// Final page once no challenge is left in the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPage {
    pub url: Url,
    pub status: u16,
    pub html: String,
    /// Number of challenges solved on the way.
    pub challenges_solved: usize,
}

/// Planned form submission of a solved challenge.
#[derive(Debug, Clone)]
pub struct ChallengeSubmission {
    /// Candidate endpoints, tried in order.
    pub endpoints: Vec<Url>,
    pub form_fields: Vec<(String, String)>,
}

impl ChallengeSubmission {
    pub fn new(challenge: &Challenge, nonce: u64, endpoints: Vec<Url>) -> Self {
        Self {
            endpoints,
            form_fields: vec![
                ("tok".into(), challenge.token.clone()),
                ("cha".into(), challenge.puzzle.clone()),
                ("sol".into(), nonce.to_string()),
                ("red".into(), challenge.redirect_target.clone()),
            ],
        }
    }

    /// URL-encoded body, fields kept in `tok, cha, sol, red` order.
    pub fn encoded_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.form_fields.iter())
            .finish()
    }
}
