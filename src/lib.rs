//! # powscraper-rs
//!
//! Fetches pages guarded by a SHA-512 proof-of-work challenge form, solving
//! and submitting the challenge transparently, with a single-flight cache in
//! front so concurrent lookups of the same resource share one network chain.
//!
//! ## Features
//!
//! - Manual redirect following with an explicit cookie jar
//! - Consistent browser header profiles (User-Agent and client hints)
//! - Process-wide request pacing with jitter
//! - Proof-of-work challenge detection, solving, and submission
//! - In-memory or redb-backed page cache with negative-result caching
//! - Retry envelope with a fixed backoff schedule
//!
//! ## Example
//!
//! ```no_run
//! use powscraper_rs::PowScraper;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scraper = PowScraper::new()?;
//!     let html = scraper.get_page_with_retry("1292052").await?;
//!     println!("{} bytes", html.len());
//!     Ok(())
//! }
//! ```

mod powscraper;

pub mod challenges;
pub mod config;
pub mod modules;

pub use crate::powscraper::{
    PowScraper,
    PowScraperBuilder,
    PowScraperError,
    PowScraperResult,
};

pub use crate::challenges::core::{
    Challenge,
    ChallengeHttpClient,
    ChallengeHttpClientError,
    ChallengeHttpRequest,
    ChallengeHttpResponse,
    ChallengeSubmission,
    CookieJar,
    FetchContext,
    FetchError,
    FetchErrorKind,
    RedirectingFetcher,
    ReqwestChallengeHttpClient,
    RequestPacer,
    ResolvedPage,
};

pub use crate::challenges::detectors::{ChallengeDetector, parse_challenge};

pub use crate::challenges::pipeline::ChallengeResolver;

pub use crate::challenges::solvers::{
    ChallengeSolveError,
    ChallengeSolver,
    ProofOfWorkSolver,
};

pub use crate::challenges::user_agents::{
    BrowserFamily,
    UserAgentError,
    UserAgentOptions,
    UserAgentProfile,
    get_user_agent_profile,
};

pub use crate::config::{ConfigError, ScraperConfig};

pub use crate::modules::{
    CacheError,
    CacheOutcome,
    CacheStore,
    ChallengeStage,
    EventDispatcher,
    EventHandler,
    FailureClass,
    LoggingHandler,
    MemoryCacheStore,
    RedbCacheStore,
    RetryEnvelope,
    RetryPolicy,
    ScraperEvent,
    SingleFlight,
    classify,
    failure_key,
    page_key,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
