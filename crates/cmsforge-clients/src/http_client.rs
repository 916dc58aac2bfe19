//! Shared HTTP client infrastructure for the platform APIs
//!
//! A single `reqwest::Client` is configured once per process and shared by the
//! Railway client, the GitHub client and the readiness probe.

use cmsforge_provision_api::ProviderError;
use cmsforge_utils::redaction::redact_message;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default connect timeout (30 seconds)
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retry attempts for 5xx and network failures
const MAX_RETRIES: u32 = 2;

/// Backoff unit; attempt `n` waits `n * INITIAL_BACKOFF`
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest response body excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Shared HTTP client for the platform APIs
///
/// Provides connection reuse, a per-request timeout and retry with linear
/// backoff on 5xx and network failures. 4xx responses are never retried.
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<Client>,
    request_timeout: Duration,
    backoff: Duration,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_request_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(request_timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("cmsforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            request_timeout,
            backoff: INITIAL_BACKOFF,
        })
    }

    /// Override the retry backoff unit.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Underlying client, for building requests
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute a request with timeout and retry policy.
    ///
    /// - Retry policy: up to 2 retries for 5xx and network failures
    /// - Linear backoff: 1s, 2s
    /// - No retries for 4xx errors, which map to typed errors
    ///
    /// Only for idempotent requests (GET, PUT, DELETE). A create that failed
    /// with a 5xx may still have happened; use [`Self::execute_once`].
    pub async fn execute_with_retry(
        &self,
        request_builder: RequestBuilder,
        provider_name: &str,
    ) -> Result<Response, ProviderError> {
        self.execute(request_builder, provider_name, MAX_RETRIES).await
    }

    /// Execute a request exactly once, with the same error mapping as
    /// [`Self::execute_with_retry`].
    pub async fn execute_once(
        &self,
        request_builder: RequestBuilder,
        provider_name: &str,
    ) -> Result<Response, ProviderError> {
        self.execute(request_builder, provider_name, 0).await
    }

    async fn execute(
        &self,
        request_builder: RequestBuilder,
        provider_name: &str,
        max_retries: u32,
    ) -> Result<Response, ProviderError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let request = request_builder
                .try_clone()
                .ok_or_else(|| {
                    ProviderError::Transport("failed to clone request for retry".to_string())
                })?
                .timeout(self.request_timeout)
                .build()
                .map_err(|e| {
                    ProviderError::Transport(redact_message(&format!(
                        "failed to build request: {e}"
                    )))
                })?;

            debug!(
                provider = provider_name,
                attempt,
                method = %request.method(),
                path = request.url().path(),
                "Executing HTTP request"
            );

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(map_client_error(status, provider_name, &body));
                    }

                    if status.is_server_error() {
                        if attempt <= max_retries {
                            warn!(
                                provider = provider_name,
                                attempt,
                                status = status.as_u16(),
                                "Server error, will retry"
                            );
                            tokio::time::sleep(self.backoff * attempt).await;
                            continue;
                        }
                        return Err(ProviderError::Outage(format!(
                            "{provider_name} returned server error: {status}"
                        )));
                    }

                    return Ok(response);
                }
                Err(e) => {
                    if e.is_timeout() {
                        return Err(ProviderError::Timeout(format!(
                            "{provider_name} did not answer within {}s",
                            self.request_timeout.as_secs()
                        )));
                    }

                    let message = redact_message(&e.to_string());
                    if attempt <= max_retries {
                        warn!(
                            provider = provider_name,
                            attempt,
                            error = %message,
                            "Network error, will retry"
                        );
                        tokio::time::sleep(self.backoff * attempt).await;
                        continue;
                    }

                    return Err(ProviderError::Transport(format!(
                        "{provider_name} request failed: {message}"
                    )));
                }
            }
        }
    }

    /// Execute with retry and decode a JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        provider_name: &str,
    ) -> Result<T, ProviderError> {
        let response = self.execute_with_retry(request_builder, provider_name).await?;
        decode_json(response, provider_name).await
    }

    /// Execute once and decode a JSON body.
    pub async fn send_json_once<T: DeserializeOwned>(
        &self,
        request_builder: RequestBuilder,
        provider_name: &str,
    ) -> Result<T, ProviderError> {
        let response = self.execute_once(request_builder, provider_name).await?;
        decode_json(response, provider_name).await
    }
}

/// Decode a successful response body as JSON.
pub async fn decode_json<T: DeserializeOwned>(
    response: Response,
    provider_name: &str,
) -> Result<T, ProviderError> {
    response.json::<T>().await.map_err(|e| {
        ProviderError::InvalidResponse(format!(
            "{provider_name} response could not be decoded: {}",
            redact_message(&e.to_string())
        ))
    })
}

/// Map 4xx status codes to [`ProviderError`] variants.
///
/// - 401/403 → `Auth`
/// - 404 → `NotFound`
/// - 429 → `RateLimited`
/// - other 4xx → `InvalidResponse`, with a redacted body excerpt
fn map_client_error(status: StatusCode, provider_name: &str, body: &str) -> ProviderError {
    let detail = body_excerpt(body);
    let suffix = if detail.is_empty() {
        String::new()
    } else {
        format!(" ({detail})")
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Auth(format!("{provider_name} rejected the token: {status}{suffix}"))
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound(format!("{provider_name}: {status}{suffix}")),
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::RateLimited(format!("{provider_name} rate limit exceeded: {status}"))
        }
        _ => ProviderError::InvalidResponse(format!(
            "{provider_name} returned client error: {status}{suffix}"
        )),
    }
}

/// Pull the `message` field out of a JSON error body, or fall back to the raw text.
fn body_excerpt(body: &str) -> String {
    let text = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let truncated: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
    redact_message(&truncated)
}
