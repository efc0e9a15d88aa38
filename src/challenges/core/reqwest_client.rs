//! Reqwest-based implementation of the `ChallengeHttpClient` trait.
//!
//! Provides a thin adapter around `reqwest::Client` with redirects disabled
//! and no cookie store, so the redirecting fetcher sees every hop and owns
//! the session cookies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, redirect::Policy};
use tokio_util::sync::CancellationToken;

use super::{ChallengeHttpClientError, ChallengeHttpRequest, ChallengeHttpResponse};

/// Reqwest-backed HTTP client used for every hop of a resolution chain.
#[derive(Debug, Clone)]
pub struct ReqwestChallengeHttpClient {
    client: Client,
}

impl ReqwestChallengeHttpClient {
    /// Creates a new client with redirects disabled so the fetcher can inspect
    /// redirect responses explicitly.
    pub fn new() -> Result<Self, ChallengeHttpClientError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|err| ChallengeHttpClientError::Transport(err.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client. The client should already have
    /// redirects disabled and no cookie store; otherwise intermediate 30x
    /// responses and their cookies are hidden from the fetcher.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl super::ChallengeHttpClient for ReqwestChallengeHttpClient {
    async fn send(
        &self,
        request: ChallengeHttpRequest,
        cancel: &CancellationToken,
    ) -> Result<ChallengeHttpResponse, ChallengeHttpClientError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(request.method, request.url.as_str())
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let exchange = async move {
            let response = builder
                .send()
                .await
                .map_err(|err| map_transport_error(err, timeout))?;
            to_challenge_response(response, timeout).await
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(ChallengeHttpClientError::Aborted),
            result = tokio::time::timeout(timeout, exchange) => {
                result.unwrap_or(Err(ChallengeHttpClientError::Timeout(timeout)))
            }
        }
    }
}

async fn to_challenge_response(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<ChallengeHttpResponse, ChallengeHttpClientError> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let url = response.url().clone();
    let body = response
        .bytes()
        .await
        .map_err(|err| map_transport_error(err, timeout))?;

    Ok(ChallengeHttpResponse {
        status,
        headers,
        body,
        url,
    })
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ChallengeHttpClientError {
    if err.is_timeout() {
        ChallengeHttpClientError::Timeout(timeout)
    } else {
        ChallengeHttpClientError::Transport(err.to_string())
    }
}
