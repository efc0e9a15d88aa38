//! Cross-cutting services module
//!
//! Caching, request de-duplication, retries, and event dispatch shared by
//! every resolution chain.

pub mod cache;
pub mod events;
pub mod retry;
pub mod single_flight;

// Re-export commonly used types
pub use cache::{
    CacheError, CacheStore, MemoryCacheStore, RedbCacheStore, failure_key, page_key,
};
pub use events::{
    CacheEvent, CacheOutcome, ChallengeEvent, ChallengeStage, ErrorEvent, EventDispatcher,
    EventHandler, LoggingHandler, PostResponseEvent, PreRequestEvent, RetryEvent, ScraperEvent,
};
pub use retry::{FailureClass, RetryEnvelope, RetryPolicy, classify};
pub use single_flight::{FlightRole, SingleFlight};
