//! HTTP transport contract and the redirect-following fetcher.
//!
//! The transport never follows redirects on its own. [`RedirectingFetcher`]
//! walks the chain by hand so every hop's `Set-Cookie` lands in the chain's
//! [`CookieJar`] and is replayed on the next hop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{
    CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, LOCATION, ORIGIN, REFERER,
    USER_AGENT,
};
use http::Method;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::analysis::origin_from_url;
use super::cookies::CookieJar;
use super::error::FetchError;
use super::types::FetchContext;
use crate::challenges::user_agents::UserAgentProfile;
use crate::modules::events::{EventDispatcher, PostResponseEvent, PreRequestEvent, ScraperEvent};

/// Contract that abstracts the underlying HTTP transport.
///
/// Implementations must not follow redirects, must honour `request.timeout`,
/// and must abort the in-flight exchange once `cancel` fires.
#[async_trait]
pub trait ChallengeHttpClient: Send + Sync {
    async fn send(
        &self,
        request: ChallengeHttpRequest,
        cancel: &CancellationToken,
    ) -> Result<ChallengeHttpResponse, ChallengeHttpClientError>;
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct ChallengeHttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl ChallengeHttpRequest {
    pub fn get(url: Url, headers: HeaderMap, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url,
            headers,
            body: None,
            timeout,
        }
    }

    pub fn post(url: Url, headers: HeaderMap, body: Vec<u8>, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            url,
            headers,
            body: Some(body),
            timeout,
        }
    }
}

/// Minimal response representation returned by the transport abstraction.
///
/// `headers` keeps repeated fields, so multi-valued `Set-Cookie` survives.
#[derive(Debug, Clone)]
pub struct ChallengeHttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

impl ChallengeHttpResponse {
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 2xx or 3xx.
    pub fn is_accepted(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChallengeHttpClientError {
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request aborted")]
    Aborted,
}

/// Issues browser-like requests and follows redirects by hand.
#[derive(Clone)]
pub struct RedirectingFetcher {
    client: Arc<dyn ChallengeHttpClient>,
    profile: UserAgentProfile,
    overrides: HeaderMap,
    timeout: Duration,
    max_redirects: usize,
    cancel: CancellationToken,
    events: Arc<EventDispatcher>,
}

impl RedirectingFetcher {
    pub fn new(client: Arc<dyn ChallengeHttpClient>, profile: UserAgentProfile) -> Self {
        Self {
            client,
            profile,
            overrides: HeaderMap::new(),
            timeout: Duration::from_secs(20),
            max_redirects: 3,
            cancel: CancellationToken::new(),
            events: Arc::new(EventDispatcher::new()),
        }
    }

    /// Caller headers merged over the generated browser headers.
    pub fn with_overrides(mut self, overrides: HeaderMap) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn profile(&self) -> &UserAgentProfile {
        &self.profile
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// GET `url` with `Referer` set to the target's own origin and follow up
    /// to `max_redirects` redirects.
    pub async fn fetch_following_redirects(
        &self,
        url: Url,
        cookie_jar: CookieJar,
    ) -> Result<FetchContext, FetchError> {
        let referer = origin_from_url(&url);
        self.fetch_with_referer(url, &referer, cookie_jar).await
    }

    /// Same as [`Self::fetch_following_redirects`] with an explicit first `Referer`.
    ///
    /// A non-2xx final status is returned as-is; judging it is up to the caller.
    pub async fn fetch_with_referer(
        &self,
        url: Url,
        referer: &str,
        mut cookie_jar: CookieJar,
    ) -> Result<FetchContext, FetchError> {
        let mut current_url = url;
        let headers = self.navigation_headers(&current_url, referer, &cookie_jar)?;
        let mut response = self
            .send(ChallengeHttpRequest::get(
                current_url.clone(),
                headers,
                self.timeout,
            ))
            .await?;
        cookie_jar.merge_response_headers(&response.headers);

        let mut redirects = 0;
        while redirects < self.max_redirects && response.is_redirect() {
            let Some(location) = response.location() else {
                break;
            };
            let next_url = current_url.join(location)?;
            log::debug!("redirect {} -> {}", current_url, next_url);

            let headers = self.navigation_headers(&next_url, current_url.as_str(), &cookie_jar)?;
            response = self
                .send(ChallengeHttpRequest::get(
                    next_url.clone(),
                    headers,
                    self.timeout,
                ))
                .await?;
            cookie_jar.merge_response_headers(&response.headers);
            current_url = next_url;
            redirects += 1;
        }

        Ok(FetchContext::new(current_url, response, cookie_jar))
    }

    /// POST a URL-encoded form from the page at `page_url`.
    ///
    /// Redirects are not followed; the caller inspects `Location` itself.
    pub async fn submit_form(
        &self,
        endpoint: &Url,
        page_url: &Url,
        body: String,
        cookie_jar: &CookieJar,
    ) -> Result<ChallengeHttpResponse, FetchError> {
        let mut headers = self.navigation_headers(endpoint, page_url.as_str(), cookie_jar)?;
        headers.insert(ORIGIN, header_value(&origin_from_url(page_url))?);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );

        self.send(ChallengeHttpRequest::post(
            endpoint.clone(),
            headers,
            body.into_bytes(),
            self.timeout,
        ))
        .await
    }

    async fn send(&self, request: ChallengeHttpRequest) -> Result<ChallengeHttpResponse, FetchError> {
        let method = request.method.clone();
        let url = request.url.clone();

        self.events.dispatch(ScraperEvent::PreRequest(PreRequestEvent {
            url: url.clone(),
            method: method.clone(),
            headers: request.headers.clone(),
            timestamp: chrono::Utc::now(),
        }));

        let started = Instant::now();
        let response = self.client.send(request, &self.cancel).await?;

        self.events.dispatch(ScraperEvent::PostResponse(PostResponseEvent {
            url,
            method,
            status: response.status,
            latency: started.elapsed(),
            timestamp: chrono::Utc::now(),
        }));

        Ok(response)
    }

    /// Browser-like header set for a navigation to `target`.
    ///
    /// Caller overrides replace generated values. An overridden `User-Agent`
    /// without its own `Sec-CH-UA` drops the generated hints, and an
    /// overridden `Cookie` replaces the jar.
    pub fn navigation_headers(
        &self,
        target: &Url,
        referer: &str,
        cookie_jar: &CookieJar,
    ) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.profile.headers() {
            headers.insert(HeaderName::from_static(name), header_value(&value)?);
        }

        let target_origin = origin_from_url(target);
        let same_origin = Url::parse(referer)
            .map(|r| origin_from_url(&r) == target_origin)
            .unwrap_or(false);

        headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("document"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("navigate"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static(if same_origin { "same-origin" } else { "cross-site" }),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-user"),
            HeaderValue::from_static("?1"),
        );
        headers.insert(
            HeaderName::from_static("upgrade-insecure-requests"),
            HeaderValue::from_static("1"),
        );
        headers.insert(REFERER, header_value(referer)?);
        headers.insert(ORIGIN, header_value(&target_origin)?);

        if let Some(cookie) = cookie_jar.to_header() {
            headers.insert(COOKIE, header_value(&cookie)?);
        }

        let overrides_hints = self
            .overrides
            .keys()
            .any(|name| name.as_str().starts_with("sec-ch-ua"));
        if self.overrides.contains_key(USER_AGENT) && !overrides_hints {
            for (name, _) in &self.profile.client_hints {
                headers.remove(*name);
            }
        }

        for name in self.overrides.keys() {
            headers.remove(name);
            for value in self.overrides.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(value)
        .map_err(|_| FetchError::Internal(format!("invalid header value '{value}'")))
}
