use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use cmsforge_provision_api::{ProviderError, ReadinessProbe};
use cmsforge_utils::redaction::redact_message;

use crate::http_client::HttpClient;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Plain `GET` readiness probe.
///
/// 2xx, 401 and 403 count as ready: an application that answers with an auth
/// challenge is up even if the health path is protected. The probe never
/// retries; the readiness poller owns the attempt budget.
#[derive(Clone)]
pub struct HttpProbe {
    http: HttpClient,
    timeout: Duration,
}

impl HttpProbe {
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            timeout: PROBE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn is_ready_status(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self, url: &str) -> Result<bool, ProviderError> {
        let response = self
            .http
            .inner()
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(format!("no answer from {url}"))
                } else {
                    ProviderError::Transport(redact_message(&e.to_string()))
                }
            })?;

        let status = response.status();
        tracing::debug!(url, status = status.as_u16(), "Readiness probe answered");
        Ok(is_ready_status(status))
    }
}
