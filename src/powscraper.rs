//! High level scraper orchestration.
//!
//! Wires the request pacer, redirecting fetcher, challenge resolver, cache
//! store, and in-flight registry together behind `get_page(id)`, with the
//! retry envelope layered on top for callers that want it.

use std::path::PathBuf;
use std::sync::Arc;

use http::HeaderMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::challenges::core::{
	ChallengeHttpClient, ChallengeHttpClientError, CookieJar, FetchError, RedirectingFetcher,
	ReqwestChallengeHttpClient, RequestPacer, ResolvedPage,
};
use crate::challenges::pipeline::ChallengeResolver;
use crate::challenges::solvers::{ChallengeSolver, ProofOfWorkSolver};
use crate::challenges::user_agents::{UserAgentError, UserAgentOptions, get_user_agent_profile};
use crate::config::{ConfigError, ScraperConfig};
use crate::modules::cache::{CacheError, CacheStore, MemoryCacheStore, RedbCacheStore, page_key};
use crate::modules::events::{CacheOutcome, EventDispatcher, EventHandler};
use crate::modules::retry::{RetryEnvelope, RetryPolicy};
use crate::modules::single_flight::{FlightRole, SingleFlight};

/// Result alias used across the orchestration layer.
pub type PowScraperResult<T> = Result<T, FetchError>;

/// Errors raised while building a scraper.
#[derive(Debug, Error)]
pub enum PowScraperError {
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),
	#[error("user-agent initialisation failed: {0}")]
	UserAgent(#[from] UserAgentError),
	#[error("http client initialisation failed: {0}")]
	Http(#[from] ChallengeHttpClientError),
	#[error("cache initialisation failed: {0}")]
	Cache(#[from] CacheError),
}

/// Fluent builder for [`PowScraper`].
pub struct PowScraperBuilder {
	config: ScraperConfig,
	user_agent: UserAgentOptions,
	header_overrides: HeaderMap,
	client: Option<Arc<dyn ChallengeHttpClient>>,
	cache: Option<Arc<dyn CacheStore>>,
	cache_path: Option<PathBuf>,
	solver: Option<Arc<dyn ChallengeSolver>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl PowScraperBuilder {
	pub fn new() -> Self {
		Self {
			config: ScraperConfig::default(),
			user_agent: UserAgentOptions::default(),
			header_overrides: HeaderMap::new(),
			client: None,
			cache: None,
			cache_path: None,
			solver: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: ScraperConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_user_agent_options(mut self, options: UserAgentOptions) -> Self {
		self.user_agent = options;
		self
	}

	/// Headers that replace the generated browser headers on every request.
	pub fn with_header_overrides(mut self, headers: HeaderMap) -> Self {
		self.header_overrides = headers;
		self
	}

	pub fn with_http_client(mut self, client: Arc<dyn ChallengeHttpClient>) -> Self {
		self.client = Some(client);
		self
	}

	pub fn with_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
		self.cache = Some(cache);
		self
	}

	/// Persist the cache in a redb file at `path`, unless a store was supplied.
	pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.cache_path = Some(path.into());
		self
	}

	pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
		self.solver = Some(solver);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn with_max_challenge_attempts(mut self, attempts: usize) -> Self {
		self.config.challenge.max_attempts = attempts.max(1);
		self
	}

	pub fn disable_pacing(mut self) -> Self {
		self.config.pacing.enabled = false;
		self
	}

	pub fn build(self) -> Result<PowScraper, PowScraperError> {
		PowScraper::with_parts(self)
	}
}

impl Default for PowScraperBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// State shared by every chain and by in-flight tasks.
struct PowScraperInner {
	config: ScraperConfig,
	user_agent: UserAgentOptions,
	header_overrides: HeaderMap,
	client: Arc<dyn ChallengeHttpClient>,
	cache: Arc<dyn CacheStore>,
	resolver: ChallengeResolver,
	pacer: RequestPacer,
	flights: SingleFlight<String>,
	retry: RetryEnvelope,
	events: Arc<EventDispatcher>,
	shutdown: CancellationToken,
}

impl PowScraperInner {
	/// One full chain: pace, fetch with redirects, resolve challenges.
	async fn fetch_page(&self, url: Url) -> PowScraperResult<ResolvedPage> {
		if self.shutdown.is_cancelled() {
			return Err(FetchError::Aborted);
		}

		self.pacer.before_request().await;

		// One profile per chain keeps UA and client hints consistent across hops.
		let profile = get_user_agent_profile(self.user_agent.clone())
			.map_err(|err| FetchError::Internal(err.to_string()))?;
		let fetcher = RedirectingFetcher::new(self.client.clone(), profile)
			.with_overrides(self.header_overrides.clone())
			.with_timeout(self.config.http.timeout())
			.with_max_redirects(self.config.http.max_redirects)
			.with_cancellation(self.shutdown.child_token())
			.with_events(self.events.clone());

		let ctx = fetcher
			.fetch_following_redirects(url, CookieJar::new())
			.await?;
		self.resolver.resolve(&fetcher, ctx).await
	}

	async fn load_page(&self, id: &str, key: &str) -> PowScraperResult<String> {
		let url = self.config.http.subject_url(id)?;
		let page = self.fetch_page(url).await?;
		self.store_page(key, &page.html).await;
		Ok(page.html)
	}

	async fn cached_page(&self, key: &str) -> Option<String> {
		match self.cache.get(key).await {
			Ok(Some(Value::String(html))) => {
				self.events.cache(key, CacheOutcome::Hit);
				Some(html)
			}
			Ok(Some(_)) => {
				log::debug!("ignoring non-text cache entry {}", key);
				None
			}
			Ok(None) => {
				self.events.cache(key, CacheOutcome::Miss);
				None
			}
			Err(err) => {
				log::warn!("cache read {} failed: {}", key, err);
				None
			}
		}
	}

	async fn store_page(&self, key: &str, html: &str) {
		let ttl = Some(self.config.cache.page_ttl());
		match self.cache.set(key, Value::String(html.to_string()), ttl).await {
			Ok(()) => self.events.cache(key, CacheOutcome::Stored),
			Err(err) => log::warn!("cache write {} failed: {}", key, err),
		}
	}
}

/// Main scraper orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct PowScraper {
	inner: Arc<PowScraperInner>,
}

impl PowScraper {
	/// Construct a scraper with default configuration.
	pub fn new() -> Result<Self, PowScraperError> {
		PowScraperBuilder::new().build()
	}

	/// Obtain a builder to customise the scraper instance.
	pub fn builder() -> PowScraperBuilder {
		PowScraperBuilder::new()
	}

	fn with_parts(builder: PowScraperBuilder) -> Result<Self, PowScraperError> {
		let PowScraperBuilder {
			config,
			user_agent,
			header_overrides,
			client,
			cache,
			cache_path,
			solver,
			handlers,
		} = builder;

		config.validate()?;
		// Fail fast on unusable user-agent options.
		get_user_agent_profile(user_agent.clone())?;

		let client: Arc<dyn ChallengeHttpClient> = match client {
			Some(client) => client,
			None => Arc::new(ReqwestChallengeHttpClient::new()?),
		};
		let cache: Arc<dyn CacheStore> = match (cache, cache_path) {
			(Some(cache), _) => cache,
			(None, Some(path)) => Arc::new(RedbCacheStore::open(path)?),
			(None, None) => Arc::new(MemoryCacheStore::new()),
		};
		let solver: Arc<dyn ChallengeSolver> = solver.unwrap_or_else(|| {
			Arc::new(ProofOfWorkSolver::new(
				config.challenge.difficulty,
				config.challenge.max_nonce,
			))
		});

		let mut events = EventDispatcher::with_logging();
		for handler in handlers {
			events.register_handler(handler);
		}
		let events = Arc::new(events);

		let resolver = ChallengeResolver::new(solver)
			.with_max_attempts(config.challenge.max_attempts)
			.with_submit_path(config.challenge.submit_path.clone())
			.with_fallback_origins(config.challenge.fallback_origins.iter().cloned())
			.with_events(events.clone());

		let pacer = if config.pacing.enabled {
			let (min_jitter, max_jitter) = config.pacing.jitter();
			RequestPacer::new(config.pacing.min_interval(), min_jitter, max_jitter)
		} else {
			RequestPacer::disabled()
		};

		let shutdown = CancellationToken::new();
		let retry = RetryEnvelope::new(cache.clone(), config.cache.prefix.clone())
			.with_policy(RetryPolicy::new(config.retry.delays()))
			.with_failure_ttl(config.cache.failure_ttl())
			.with_cancellation(shutdown.clone())
			.with_events(events.clone());

		Ok(Self {
			inner: Arc::new(PowScraperInner {
				config,
				user_agent,
				header_overrides,
				client,
				cache,
				resolver,
				pacer,
				flights: SingleFlight::new(),
				retry,
				events,
				shutdown,
			}),
		})
	}

	pub fn config(&self) -> &ScraperConfig {
		&self.inner.config
	}

	pub fn events(&self) -> &Arc<EventDispatcher> {
		&self.inner.events
	}

	/// Fetch and resolve an arbitrary URL, bypassing cache and de-duplication.
	pub async fn fetch_page(&self, url: &str) -> PowScraperResult<ResolvedPage> {
		let url = Url::parse(url)?;
		self.inner.fetch_page(url).await
	}

	/// Resolved HTML for subject `id`.
	///
	/// Served from the cache when possible. Concurrent calls for the same id
	/// share one network chain and receive the same result.
	pub async fn get_page(&self, id: &str) -> PowScraperResult<String> {
		let key = page_key(&self.inner.config.cache.prefix, id);
		if let Some(html) = self.inner.cached_page(&key).await {
			return Ok(html);
		}

		let inner = self.inner.clone();
		let owned_id = id.to_string();
		let owned_key = key.clone();
		let (result, role) = self
			.inner
			.flights
			.run(&key, move || async move { inner.load_page(&owned_id, &owned_key).await })
			.await;

		if role == FlightRole::Waiter {
			self.inner.events.cache(&key, CacheOutcome::Joined);
		}
		result
	}

	/// [`Self::get_page`] wrapped in the retry envelope.
	pub async fn get_page_with_retry(&self, id: &str) -> PowScraperResult<String> {
		self.inner.retry.run(id, || self.get_page(id)).await
	}

	/// Fetch subject `id` and extract business fields with `parse`.
	///
	/// A parse failure surfaces as [`FetchError::Parse`] and is neither
	/// retried nor remembered as a negative result.
	pub async fn fetch_subject<T, P>(&self, id: &str, parse: P) -> PowScraperResult<T>
	where
		P: Fn(&str) -> Result<T, String>,
	{
		self.inner
			.retry
			.run(id, || async {
				let html = self.get_page(id).await?;
				parse(&html).map_err(FetchError::Parse)
			})
			.await
	}

	/// Abort in-flight HTTP calls and refuse new chains.
	pub fn shutdown(&self) {
		log::info!("shutting down scraper");
		self.inner.shutdown.cancel();
	}

	pub fn is_shutdown(&self) -> bool {
		self.inner.shutdown.is_cancelled()
	}
}

impl std::fmt::Debug for PowScraper {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PowScraper")
			.field("config", &self.inner.config)
			.field("in_flight", &self.inner.flights.in_flight_len())
			.field("shutdown", &self.is_shutdown())
			.finish()
	}
}
