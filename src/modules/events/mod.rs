//! Event system for the fetch pipeline.
//!
//! Provides hooks for logging and custom reactions around requests,
//! challenge resolution, cache traffic, and retries.

use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Structured pre-request event.
#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub timestamp: DateTime<Utc>,
}

/// Structured post-response event.
#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub url: Url,
    pub method: Method,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Resolver state transitions worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStage {
    Detected,
    Solved,
    Submitted,
    Redirected,
    Resolved,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ChallengeEvent {
    pub url: String,
    pub stage: ChallengeStage,
    pub attempt: usize,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Stored,
    Joined,
    NegativeHit,
    NegativeStored,
}

#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub key: String,
    pub outcome: CacheOutcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub resource: String,
    pub error: String,
    pub status: u16,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub resource: String,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ScraperEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    Challenge(ChallengeEvent),
    Cache(CacheEvent),
    Error(ErrorEvent),
    Retry(RetryEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ScraperEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with the [`LoggingHandler`] already registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ScraperEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }

    pub fn challenge(&self, url: &Url, stage: ChallengeStage, attempt: usize, detail: Option<String>) {
        self.dispatch(ScraperEvent::Challenge(ChallengeEvent {
            url: url.as_str().to_string(),
            stage,
            attempt,
            detail,
            timestamp: Utc::now(),
        }));
    }

    pub fn cache(&self, key: &str, outcome: CacheOutcome) {
        self.dispatch(ScraperEvent::Cache(CacheEvent {
            key: key.to_string(),
            outcome,
            timestamp: Utc::now(),
        }));
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ScraperEvent) {
        match event {
            ScraperEvent::PreRequest(pre) => {
                log::debug!("-> {} {}", pre.method, pre.url);
            }
            ScraperEvent::PostResponse(post) => {
                log::debug!(
                    "<- {} {} -> {} ({:.2}s)",
                    post.method,
                    post.url,
                    post.status,
                    post.latency.as_secs_f64()
                );
            }
            ScraperEvent::Challenge(challenge) => match challenge.stage {
                ChallengeStage::Failed => log::warn!(
                    "challenge {} failed at attempt {}: {}",
                    challenge.url,
                    challenge.attempt,
                    challenge.detail.as_deref().unwrap_or("unknown")
                ),
                stage => log::info!(
                    "challenge {} {:?} (attempt {})",
                    challenge.url,
                    stage,
                    challenge.attempt
                ),
            },
            ScraperEvent::Cache(cache) => {
                log::debug!("cache {:?} {}", cache.outcome, cache.key);
            }
            ScraperEvent::Error(error) => {
                log::warn!("warning {} -> {} ({})", error.resource, error.error, error.status);
            }
            ScraperEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s ({})",
                    retry.resource,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
        }
    }
}
