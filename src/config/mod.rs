//! Settings and configuration module
//!
//! Provides the scraper configuration with:
//! - Serde defaults for every section
//! - JSON loading from strings or files
//! - Validation before a scraper is built

pub mod settings;

pub use settings::{
    CacheConfig, ChallengeConfig, ConfigError, HttpConfig, PacingConfig, RetryConfig,
    ScraperConfig,
};
