//! Challenge resolution state machine.
//!
//! Starting from a fetched page, the resolver loops
//! `detect -> solve -> submit -> follow -> detect` until the page carries no
//! challenge or the attempt cap is reached. Cookies and URLs from one step
//! feed the next, so every step runs strictly in order.

use std::sync::Arc;

use url::Url;

use crate::challenges::core::{
    Challenge, ChallengeHttpResponse, ChallengeSubmission, FetchContext, FetchError,
    RedirectingFetcher, ResolvedPage, origin_from_url, with_origin,
};
use crate::challenges::detectors::ChallengeDetector;
use crate::challenges::solvers::{ChallengeSolver, ProofOfWorkSolver};
use crate::modules::events::{ChallengeStage, EventDispatcher};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_SUBMIT_PATH: &str = "/c";

/// Drives a fetched page through challenge resolution.
pub struct ChallengeResolver {
    detector: ChallengeDetector,
    solver: Arc<dyn ChallengeSolver>,
    max_attempts: usize,
    submit_path: String,
    fallback_origins: Vec<String>,
    events: Arc<EventDispatcher>,
}

impl ChallengeResolver {
    pub fn new(solver: Arc<dyn ChallengeSolver>) -> Self {
        Self {
            detector: ChallengeDetector::new(),
            solver,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            submit_path: DEFAULT_SUBMIT_PATH.into(),
            fallback_origins: Vec::new(),
            events: Arc::new(EventDispatcher::new()),
        }
    }

    pub fn with_detector(mut self, detector: ChallengeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Path used when the challenge form carries no `action`.
    pub fn with_submit_path(mut self, path: impl Into<String>) -> Self {
        self.submit_path = path.into();
        self
    }

    /// Extra origins known to host the submit endpoint, tried after the page's own.
    pub fn with_fallback_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Resolve `ctx` into a challenge-free page.
    ///
    /// Each detected challenge instance is solved exactly once. A solve
    /// failure is returned immediately and never retried here.
    pub async fn resolve(
        &self,
        fetcher: &RedirectingFetcher,
        mut ctx: FetchContext,
    ) -> Result<ResolvedPage, FetchError> {
        let mut attempts = 0;

        loop {
            let html = ctx.body_text();
            let Some(challenge) = self.detector.detect(&html) else {
                return self.finish(ctx, html, attempts);
            };

            if attempts >= self.max_attempts {
                self.events.challenge(
                    &ctx.current_url,
                    ChallengeStage::Failed,
                    attempts,
                    Some("attempt cap reached".into()),
                );
                return Err(FetchError::Unresolved { attempts });
            }
            attempts += 1;
            self.events
                .challenge(&ctx.current_url, ChallengeStage::Detected, attempts, None);

            let nonce = match self.solve(&challenge).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    self.fail(&ctx.current_url, attempts, &err);
                    return Err(err);
                }
            };
            self.events.challenge(
                &ctx.current_url,
                ChallengeStage::Solved,
                attempts,
                Some(format!("nonce={nonce}")),
            );

            let endpoints = self.submit_endpoints(&ctx.current_url, &challenge)?;
            let submission = ChallengeSubmission::new(&challenge, nonce, endpoints);
            let (endpoint, response) = match self.submit(fetcher, &ctx, &submission).await {
                Ok(submitted) => submitted,
                Err(err) => {
                    self.fail(&ctx.current_url, attempts, &err);
                    return Err(err);
                }
            };
            ctx.cookie_jar.merge_response_headers(&response.headers);
            self.events.challenge(
                &ctx.current_url,
                ChallengeStage::Submitted,
                attempts,
                Some(endpoint.to_string()),
            );

            let follow_url = follow_up_url(&endpoint, &response, &ctx.current_url, &challenge)?;
            let referer = ctx.current_url.to_string();
            ctx = fetcher
                .fetch_with_referer(follow_url, &referer, ctx.cookie_jar)
                .await?;
            self.events
                .challenge(&ctx.current_url, ChallengeStage::Redirected, attempts, None);
        }
    }

    async fn solve(&self, challenge: &Challenge) -> Result<u64, FetchError> {
        let solver = self.solver.clone();
        let puzzle = challenge.puzzle.clone();
        let nonce = tokio::task::spawn_blocking(move || solver.solve(&puzzle))
            .await
            .map_err(|err| FetchError::Internal(format!("solver task failed: {err}")))??;
        Ok(nonce)
    }

    /// Candidate submit endpoints in priority order, duplicates removed.
    pub fn submit_endpoints(
        &self,
        current_url: &Url,
        challenge: &Challenge,
    ) -> Result<Vec<Url>, FetchError> {
        let action = challenge
            .submit_action
            .as_deref()
            .filter(|action| !action.trim().is_empty())
            .unwrap_or(&self.submit_path);
        let primary = current_url.join(action)?;

        let mut endpoints = vec![primary.clone()];
        let origins = std::iter::once(origin_from_url(current_url))
            .chain(self.fallback_origins.iter().cloned());
        for origin in origins {
            if let Some(candidate) = with_origin(&primary, &origin)
                && !endpoints.contains(&candidate)
            {
                endpoints.push(candidate);
            }
        }

        Ok(endpoints)
    }

    /// POST the solution, moving on to the next endpoint only on a 404.
    async fn submit(
        &self,
        fetcher: &RedirectingFetcher,
        ctx: &FetchContext,
        submission: &ChallengeSubmission,
    ) -> Result<(Url, ChallengeHttpResponse), FetchError> {
        let body = submission.encoded_body();
        let last = submission.endpoints.len().saturating_sub(1);

        for (idx, endpoint) in submission.endpoints.iter().enumerate() {
            let response = fetcher
                .submit_form(endpoint, &ctx.current_url, body.clone(), &ctx.cookie_jar)
                .await?;

            if response.status == 404 && idx < last {
                log::debug!("submit endpoint {} answered 404, trying next", endpoint);
                continue;
            }
            if response.is_accepted() {
                return Ok((endpoint.clone(), response));
            }
            return Err(FetchError::ChallengeSubmit {
                status: response.status,
                endpoint: endpoint.to_string(),
            });
        }

        Err(FetchError::ChallengeSubmit {
            status: 0,
            endpoint: String::new(),
        })
    }

    fn finish(
        &self,
        ctx: FetchContext,
        html: String,
        attempts: usize,
    ) -> Result<ResolvedPage, FetchError> {
        let status = ctx.status();

        if attempts == 0 && !ctx.response.is_success() {
            return Err(FetchError::UpstreamHttp { status });
        }
        if attempts > 0 && !ctx.response.is_accepted() {
            let err = FetchError::ChallengeFollowUp {
                status,
                url: ctx.current_url.to_string(),
            };
            self.fail(&ctx.current_url, attempts, &err);
            return Err(err);
        }

        if attempts > 0 {
            self.events
                .challenge(&ctx.current_url, ChallengeStage::Resolved, attempts, None);
        }

        Ok(ResolvedPage {
            url: ctx.current_url,
            status,
            html,
            challenges_solved: attempts,
        })
    }

    fn fail(&self, url: &Url, attempts: usize, err: &FetchError) {
        self.events
            .challenge(url, ChallengeStage::Failed, attempts, Some(err.to_string()));
    }
}

impl Default for ChallengeResolver {
    fn default() -> Self {
        Self::new(Arc::new(ProofOfWorkSolver::default()))
    }
}

/// `Location` of the submit response, else the challenge's own redirect target.
fn follow_up_url(
    endpoint: &Url,
    response: &ChallengeHttpResponse,
    current_url: &Url,
    challenge: &Challenge,
) -> Result<Url, FetchError> {
    match response.location() {
        Some(location) => Ok(endpoint.join(location)?),
        None => Ok(current_url.join(&challenge.redirect_target)?),
    }
}
