//! Retry and backoff envelope around page fetches.
//!
//! Failures are classified from [`FetchError`]. Transient classes are retried
//! on a fixed schedule. Permanent outcomes and exhausted retries are stored
//! under a failure key for a short TTL so repeated callers skip the upstream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::challenges::core::FetchError;
use crate::modules::cache::{CacheStore, failure_key};
use crate::modules::events::{CacheOutcome, ErrorEvent, EventDispatcher, RetryEvent, ScraperEvent};

/// Retry classification of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Timeout,
    RateLimited,
    ServerError,
    NotFound,
    NetworkError,
    ParseError,
    /// Challenge could not be passed.
    Blocked,
}

impl FailureClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::ServerError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::NotFound => "not_found",
            Self::NetworkError => "network_error",
            Self::ParseError => "parse_error",
            Self::Blocked => "blocked",
        }
    }
}

pub fn classify(err: &FetchError) -> FailureClass {
    match err {
        FetchError::Timeout(_) => FailureClass::Timeout,
        FetchError::UpstreamHttp { status: 404 } => FailureClass::NotFound,
        FetchError::UpstreamHttp { status: 429 } => FailureClass::RateLimited,
        FetchError::UpstreamHttp { status } if *status >= 500 => FailureClass::ServerError,
        FetchError::UpstreamHttp { .. } => FailureClass::NetworkError,
        FetchError::ChallengeSolve { .. }
        | FetchError::ChallengeSubmit { .. }
        | FetchError::ChallengeFollowUp { .. }
        | FetchError::Unresolved { .. } => FailureClass::Blocked,
        FetchError::Parse(_) => FailureClass::ParseError,
        FetchError::RecentFailure { status, .. } => match status {
            404 => FailureClass::NotFound,
            403 => FailureClass::Blocked,
            _ => FailureClass::NetworkError,
        },
        FetchError::Network(_)
        | FetchError::Aborted
        | FetchError::InvalidUrl(_)
        | FetchError::Cache(_)
        | FetchError::Internal(_) => FailureClass::NetworkError,
    }
}

/// Permanent outcomes worth remembering: 404, challenge failures, other 4xx.
fn is_terminal_negative(err: &FetchError, class: FailureClass) -> bool {
    match class {
        FailureClass::NotFound | FailureClass::Blocked => true,
        FailureClass::NetworkError => {
            matches!(err, FetchError::UpstreamHttp { status } if (400..500).contains(status))
        }
        _ => false,
    }
}

/// Fixed backoff schedule; one retry per delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Delay before retry number `retry` (0-based), if any remain.
    pub fn delay_for(&self, retry: usize) -> Option<Duration> {
        self.delays.get(retry).copied()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
        ])
    }
}

/// Stored negative result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NegativeEntry {
    status: u16,
    kind: String,
    message: String,
}

pub struct RetryEnvelope {
    policy: RetryPolicy,
    cache: Arc<dyn CacheStore>,
    prefix: String,
    failure_ttl: Duration,
    cancel: CancellationToken,
    events: Arc<EventDispatcher>,
}

impl RetryEnvelope {
    pub fn new(cache: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            policy: RetryPolicy::default(),
            cache,
            prefix: prefix.into(),
            failure_ttl: Duration::from_secs(1800),
            cancel: CancellationToken::new(),
            events: Arc::new(EventDispatcher::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_failure_ttl(mut self, ttl: Duration) -> Self {
        self.failure_ttl = ttl;
        self
    }

    /// Backoff sleeps end early with `Aborted` once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` for resource `id` under the retry policy.
    pub async fn run<T, F, Fut>(&self, id: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let key = failure_key(&self.prefix, id);
        if let Some(recent) = self.recent_failure(&key).await {
            return Err(recent);
        }

        let mut retry = 0;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let class = classify(&err);

            if class.is_retryable() {
                if let Some(delay) = self.policy.delay_for(retry) {
                    retry += 1;
                    self.events.dispatch(ScraperEvent::Retry(RetryEvent {
                        resource: id.to_string(),
                        attempt: retry as u32,
                        reason: err.to_string(),
                        scheduled_after: delay,
                        timestamp: Utc::now(),
                    }));
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(FetchError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
                log::warn!(
                    "giving up on {} after {} attempts: {}",
                    id,
                    self.policy.max_attempts(),
                    err
                );
                self.remember_failure(&key, &err).await;
            } else if is_terminal_negative(&err, class) {
                self.remember_failure(&key, &err).await;
            }

            self.events.dispatch(ScraperEvent::Error(ErrorEvent {
                resource: id.to_string(),
                error: err.to_string(),
                status: err.status(),
                timestamp: Utc::now(),
            }));
            return Err(err);
        }
    }

    async fn recent_failure(&self, key: &str) -> Option<FetchError> {
        let value = match self.cache.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("failure cache read {} failed: {}", key, err);
                return None;
            }
        };

        match serde_json::from_value::<NegativeEntry>(value) {
            Ok(entry) => {
                self.events.cache(key, CacheOutcome::NegativeHit);
                Some(FetchError::RecentFailure {
                    status: entry.status,
                    message: entry.message,
                })
            }
            Err(err) => {
                log::debug!("ignoring malformed failure entry {}: {}", key, err);
                None
            }
        }
    }

    async fn remember_failure(&self, key: &str, err: &FetchError) {
        let entry = NegativeEntry {
            status: err.status(),
            kind: err.kind().as_str().to_string(),
            message: err.to_string(),
        };
        let value = match serde_json::to_value(&entry) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("failed to encode failure entry {}: {}", key, err);
                return;
            }
        };

        match self.cache.set(key, value, Some(self.failure_ttl)).await {
            Ok(()) => self.events.cache(key, CacheOutcome::NegativeStored),
            Err(err) => log::warn!("failure cache write {} failed: {}", key, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::MemoryCacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn envelope(cache: Arc<MemoryCacheStore>) -> RetryEnvelope {
        RetryEnvelope::new(cache, "douban")
    }

    #[test]
    fn classification_table() {
        let cases = [
            (FetchError::Timeout(Duration::from_secs(20)), FailureClass::Timeout),
            (FetchError::UpstreamHttp { status: 429 }, FailureClass::RateLimited),
            (FetchError::UpstreamHttp { status: 503 }, FailureClass::ServerError),
            (FetchError::UpstreamHttp { status: 404 }, FailureClass::NotFound),
            (FetchError::UpstreamHttp { status: 410 }, FailureClass::NetworkError),
            (FetchError::Parse("title".into()), FailureClass::ParseError),
            (FetchError::Unresolved { attempts: 3 }, FailureClass::Blocked),
            (FetchError::Network("reset".into()), FailureClass::NetworkError),
            (FetchError::Aborted, FailureClass::NetworkError),
        ];
        for (err, class) in cases {
            assert_eq!(classify(&err), class, "{err}");
        }
        assert!(FailureClass::Timeout.is_retryable());
        assert!(!FailureClass::Blocked.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_retry_on_schedule_then_cache_failure() {
        let cache = Arc::new(MemoryCacheStore::new());
        let envelope = envelope(cache.clone());
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let result: Result<(), _> = envelope
            .run("1292052", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::Timeout(Duration::from_secs(20))) }
            })
            .await;

        assert!(matches!(result, Err(FetchError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(14) && elapsed < Duration::from_secs(15));

        let again: Result<(), _> = envelope
            .run("1292052", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(again, Err(FetchError::RecentFailure { status: 504, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let envelope = envelope(Arc::new(MemoryCacheStore::new()));
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let result = envelope
            .run("1", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FetchError::UpstreamHttp { status: 502 })
                    } else {
                        Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn not_found_is_terminal_and_cached() {
        let cache = Arc::new(MemoryCacheStore::new());
        let envelope = envelope(cache.clone());
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = envelope
            .run("404", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::UpstreamHttp { status: 404 }) }
            })
            .await;
        assert_eq!(result, Err(FetchError::UpstreamHttp { status: 404 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = cache.get("douban-details-fail-id=404").await.unwrap().unwrap();
        assert_eq!(stored["status"], 404);
        assert_eq!(stored["kind"], "upstream_http");
    }

    #[tokio::test]
    async fn challenge_failures_are_not_retried() {
        let cache = Arc::new(MemoryCacheStore::new());
        let envelope = envelope(cache.clone());
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = envelope
            .run("7", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(FetchError::ChallengeSolve {
                        difficulty: 4,
                        max_nonce: 2_000_000,
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(FetchError::ChallengeSolve { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("douban-details-fail-id=7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn parse_and_transport_errors_are_not_cached() {
        let cache = Arc::new(MemoryCacheStore::new());
        let envelope = envelope(cache.clone());

        for err in [FetchError::Parse("missing title".into()), FetchError::Network("reset".into())] {
            let expected = err.clone();
            let result: Result<(), _> = envelope.run("9", || {
                let err = err.clone();
                async move { Err(err) }
            }).await;
            assert_eq!(result, Err(expected));
        }
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let envelope = envelope(Arc::new(MemoryCacheStore::new())).with_cancellation(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let result: Result<(), _> = envelope
            .run("1", || async { Err(FetchError::UpstreamHttp { status: 429 }) })
            .await;
        assert_eq!(result, Err(FetchError::Aborted));
        canceller.await.unwrap();
    }
}
