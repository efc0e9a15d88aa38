use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::challenges::core::FetchError;

/// Placeholder replaced by the resource id in [`HttpConfig::subject_url_template`].
pub const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Io { path: String, message: String },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration, every section optional in JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub pacing: PacingConfig,
    pub http: HttpConfig,
    pub challenge: ChallengeConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

impl ScraperConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pacing.validate()?;
        self.http.validate()?;
        self.challenge.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

/// Minimum spacing between outgoing chains, plus random jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub enabled: bool,
    pub min_interval_ms: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 1_000,
            jitter_min_ms: 300,
            jitter_max_ms: 1_000,
        }
    }
}

impl PacingConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn jitter(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.jitter_min_ms),
            Duration::from_millis(self.jitter_max_ms),
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(ConfigError::Invalid(format!(
                "pacing jitter range {}..{} ms is inverted",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub max_redirects: usize,
    /// Page URL for a resource id; must contain `{id}`.
    pub subject_url_template: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            max_redirects: 3,
            subject_url_template: "https://movie.douban.com/subject/{id}/".into(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Ids must be a single plain token so they cannot steer the path or query.
    pub fn subject_url(&self, id: &str) -> Result<Url, FetchError> {
        let plain = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !plain {
            return Err(FetchError::InvalidUrl(format!("unsupported resource id {id:?}")));
        }
        Ok(Url::parse(
            &self.subject_url_template.replace(ID_PLACEHOLDER, id),
        )?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("http timeout must be positive".into()));
        }
        if !self.subject_url_template.contains(ID_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "subject url template {:?} lacks {ID_PLACEHOLDER}",
                self.subject_url_template
            )));
        }
        self.subject_url("0").map_err(|err| {
            ConfigError::Invalid(format!("subject url template is not a url: {err}"))
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    pub max_attempts: usize,
    pub difficulty: usize,
    pub max_nonce: u64,
    pub submit_path: String,
    pub fallback_origins: Vec<String>,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            difficulty: 4,
            max_nonce: 2_000_000,
            submit_path: "/c".into(),
            fallback_origins: vec![
                "https://www.douban.com".into(),
                "https://movie.douban.com".into(),
            ],
        }
    }
}

impl ChallengeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "challenge max_attempts must be at least 1".into(),
            ));
        }
        if self.max_nonce == 0 {
            return Err(ConfigError::Invalid("challenge max_nonce must be positive".into()));
        }
        if self.submit_path.trim().is_empty() {
            return Err(ConfigError::Invalid("challenge submit_path is empty".into()));
        }
        for origin in &self.fallback_origins {
            let parsed = Url::parse(origin)
                .map_err(|err| ConfigError::Invalid(format!("fallback origin {origin:?}: {err}")))?;
            if parsed.host_str().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "fallback origin {origin:?} has no host"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub prefix: String,
    pub page_ttl_secs: u64,
    pub failure_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "douban".into(),
            page_ttl_secs: 604_800,
            failure_ttl_secs: 1_800,
        }
    }
}

impl CacheConfig {
    pub fn page_ttl(&self) -> Duration {
        Duration::from_secs(self.page_ttl_secs)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.is_empty() {
            return Err(ConfigError::Invalid("cache prefix is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// One retry per entry.
    pub delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays_ms: vec![2_000, 4_000, 8_000],
        }
    }
}

impl RetryConfig {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays_ms.iter().copied().map(Duration::from_millis).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ScraperConfig::default();
        config.validate().unwrap();
        assert_eq!(config.http.timeout(), Duration::from_secs(20));
        assert_eq!(config.cache.page_ttl(), Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.retry.delays().len(), 3);
        assert_eq!(
            config.http.subject_url("1292052").unwrap().as_str(),
            "https://movie.douban.com/subject/1292052/"
        );
    }

    #[test]
    fn subject_ids_cannot_escape_the_template() {
        let http = HttpConfig::default();
        assert_eq!(
            http.subject_url("tt-01_a").unwrap().as_str(),
            "https://movie.douban.com/subject/tt-01_a/"
        );
        for id in ["", "../../people/ahbei", "1/../../search", "1?x=1", "1#frag", "..", "a b"] {
            assert!(
                matches!(http.subject_url(id), Err(FetchError::InvalidUrl(_))),
                "{id:?}"
            );
        }
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ScraperConfig::from_json_str(
            r#"{"challenge": {"difficulty": 2}, "cache": {"prefix": "mirror"}}"#,
        )
        .unwrap();
        assert_eq!(config.challenge.difficulty, 2);
        assert_eq!(config.challenge.max_attempts, 3);
        assert_eq!(config.cache.prefix, "mirror");
        assert_eq!(config.cache.failure_ttl_secs, 1_800);
        assert_eq!(config.pacing, PacingConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            r#"{"pacing": {"jitter_min_ms": 900, "jitter_max_ms": 100}}"#,
            r#"{"http": {"timeout_ms": 0}}"#,
            r#"{"http": {"subject_url_template": "https://example.com/subject/"}}"#,
            r#"{"challenge": {"max_attempts": 0}}"#,
            r#"{"challenge": {"fallback_origins": ["not a url"]}}"#,
            r#"{"cache": {"prefix": ""}}"#,
        ];
        for raw in cases {
            assert!(
                matches!(ScraperConfig::from_json_str(raw), Err(ConfigError::Invalid(_))),
                "{raw}"
            );
        }
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            ScraperConfig::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"retry": {{"delays_ms": [10, 20]}}}}"#).unwrap();
        let config = ScraperConfig::from_path(file.path()).unwrap();
        assert_eq!(
            config.retry.delays(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );

        let missing = ScraperConfig::from_path(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
