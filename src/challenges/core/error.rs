//! Tagged error surfaced by the fetch-and-resolve pipeline.
//!
//! Every failure carries an HTTP-equivalent status so route layers can map it
//! straight onto a response, and a fieldless [`FetchErrorKind`] discriminant
//! that the retry envelope matches on.

use std::time::Duration;

use thiserror::Error;

use super::executor::ChallengeHttpClientError;

/// Failure states of a page fetch, from transport errors to challenge failures.
///
/// `Clone` so a single in-flight resolution can hand the same error to every
/// caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request aborted")]
    Aborted,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("no nonce within {max_nonce} satisfies difficulty {difficulty}")]
    ChallengeSolve { difficulty: usize, max_nonce: u64 },
    #[error("challenge submission to {endpoint} failed with status {status}")]
    ChallengeSubmit { status: u16, endpoint: String },
    #[error("challenge follow-up to {url} failed with status {status}")]
    ChallengeFollowUp { status: u16, url: String },
    #[error("challenge still present after {attempts} attempts")]
    Unresolved { attempts: usize },
    #[error("upstream responded with status {status}")]
    UpstreamHttp { status: u16 },
    #[error("failed to parse page: {0}")]
    Parse(String),
    #[error("cache store error: {0}")]
    Cache(String),
    #[error("recent failure cached (status {status}): {message}")]
    RecentFailure { status: u16, message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

/// Fieldless discriminant of [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Network,
    Timeout,
    Aborted,
    InvalidUrl,
    ChallengeSolve,
    ChallengeSubmit,
    ChallengeFollowUp,
    Unresolved,
    UpstreamHttp,
    Parse,
    Cache,
    RecentFailure,
    Internal,
}

impl FetchErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Aborted => "aborted",
            FetchErrorKind::InvalidUrl => "invalid_url",
            FetchErrorKind::ChallengeSolve => "challenge_solve",
            FetchErrorKind::ChallengeSubmit => "challenge_submit",
            FetchErrorKind::ChallengeFollowUp => "challenge_follow_up",
            FetchErrorKind::Unresolved => "unresolved",
            FetchErrorKind::UpstreamHttp => "upstream_http",
            FetchErrorKind::Parse => "parse",
            FetchErrorKind::Cache => "cache",
            FetchErrorKind::RecentFailure => "recent_failure",
            FetchErrorKind::Internal => "internal",
        }
    }
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network(_) => FetchErrorKind::Network,
            FetchError::Timeout(_) => FetchErrorKind::Timeout,
            FetchError::Aborted => FetchErrorKind::Aborted,
            FetchError::InvalidUrl(_) => FetchErrorKind::InvalidUrl,
            FetchError::ChallengeSolve { .. } => FetchErrorKind::ChallengeSolve,
            FetchError::ChallengeSubmit { .. } => FetchErrorKind::ChallengeSubmit,
            FetchError::ChallengeFollowUp { .. } => FetchErrorKind::ChallengeFollowUp,
            FetchError::Unresolved { .. } => FetchErrorKind::Unresolved,
            FetchError::UpstreamHttp { .. } => FetchErrorKind::UpstreamHttp,
            FetchError::Parse(_) => FetchErrorKind::Parse,
            FetchError::Cache(_) => FetchErrorKind::Cache,
            FetchError::RecentFailure { .. } => FetchErrorKind::RecentFailure,
            FetchError::Internal(_) => FetchErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status for route layers.
    pub fn status(&self) -> u16 {
        match self {
            FetchError::Timeout(_) => 504,
            FetchError::ChallengeSolve { .. }
            | FetchError::ChallengeSubmit { .. }
            | FetchError::ChallengeFollowUp { .. }
            | FetchError::Unresolved { .. } => 403,
            FetchError::UpstreamHttp { status } => match *status {
                404 => 404,
                429 => 429,
                s if s >= 500 => 502,
                s => s,
            },
            FetchError::Network(_) => 502,
            FetchError::Aborted => 503,
            FetchError::RecentFailure { status, .. } => *status,
            FetchError::InvalidUrl(_)
            | FetchError::Parse(_)
            | FetchError::Cache(_)
            | FetchError::Internal(_) => 500,
        }
    }

    /// True for failures produced while solving or submitting a challenge.
    pub fn is_challenge_failure(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::ChallengeSolve
                | FetchErrorKind::ChallengeSubmit
                | FetchErrorKind::ChallengeFollowUp
                | FetchErrorKind::Unresolved
        )
    }
}

impl From<ChallengeHttpClientError> for FetchError {
    fn from(err: ChallengeHttpClientError) -> Self {
        match err {
            ChallengeHttpClientError::Transport(message) => FetchError::Network(message),
            ChallengeHttpClientError::Timeout(after) => FetchError::Timeout(after),
            ChallengeHttpClientError::Aborted => FetchError::Aborted,
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_failures_map_to_forbidden() {
        let errors = [
            FetchError::ChallengeSolve {
                difficulty: 4,
                max_nonce: 10,
            },
            FetchError::ChallengeSubmit {
                status: 404,
                endpoint: "https://example.com/c".into(),
            },
            FetchError::ChallengeFollowUp {
                status: 500,
                url: "https://example.com/next".into(),
            },
            FetchError::Unresolved { attempts: 3 },
        ];
        for err in errors {
            assert_eq!(err.status(), 403, "{err}");
            assert!(err.is_challenge_failure());
        }
    }

    #[test]
    fn upstream_status_mapping() {
        assert_eq!(FetchError::UpstreamHttp { status: 404 }.status(), 404);
        assert_eq!(FetchError::UpstreamHttp { status: 429 }.status(), 429);
        assert_eq!(FetchError::UpstreamHttp { status: 503 }.status(), 502);
        assert_eq!(FetchError::UpstreamHttp { status: 410 }.status(), 410);
        assert_eq!(FetchError::Timeout(Duration::from_secs(20)).status(), 504);
    }

    #[test]
    fn transport_errors_convert() {
        let err: FetchError = ChallengeHttpClientError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(err.kind(), FetchErrorKind::Timeout);
        let err: FetchError = ChallengeHttpClientError::Transport("reset".into()).into();
        assert_eq!(err, FetchError::Network("reset".into()));
    }
}
