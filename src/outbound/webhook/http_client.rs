use std::time::{Duration, Instant};

use reqwest::Client;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::{debug, warn};

use super::audit_log::truncate;

/// Error type for HTTP client operations
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl HttpClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else if err.is_builder() {
            HttpClientError::InvalidUrl(err.to_string())
        } else if err.is_connect() {
            HttpClientError::NetworkError(err.to_string())
        } else {
            HttpClientError::RequestFailed(err.to_string())
        }
    }
}

/// One outbound POST.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub timeout: Duration,
    pub verify_tls: bool,
}

/// Whatever the endpoint answered, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub body: String,
    pub duration_ms: u64,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// HTTP client wrapper for webhook delivery
///
/// Holds two pooled clients: the regular one and one that skips certificate
/// validation, used only for subscriptions that opted out of TLS checks.
pub struct WebhookHttpClient {
    client: Client,
    insecure_client: Client,
    response_body_limit: usize,
}

impl WebhookHttpClient {
    /// Create a new HTTP client sending the given `User-Agent`.
    pub fn new(user_agent: &str, response_body_limit: usize) -> Result<Self, HttpClientError> {
        let build = |verify_tls: bool| {
            Client::builder()
                .user_agent(user_agent)
                .danger_accept_invalid_certs(!verify_tls)
                .build()
                .map_err(|e| HttpClientError::ClientBuild(e.to_string()))
        };

        Ok(Self {
            client: build(true)?,
            insecure_client: build(false)?,
            response_body_limit,
        })
    }

    /// Send a webhook POST request. Non-2xx answers are returned as `Ok`;
    /// only transport problems are errors.
    pub async fn send(&self, request: WebhookRequest) -> Result<WebhookResponse, HttpClientError> {
        let WebhookRequest {
            url,
            headers,
            body,
            timeout,
            verify_tls,
        } = request;

        let client = if verify_tls {
            &self.client
        } else {
            warn!(url = %url, "TLS certificate verification disabled for webhook delivery");
            &self.insecure_client
        };

        debug!(url = %url, "Sending webhook");
        let start = Instant::now();

        let response = client
            .post(&url)
            .headers(headers)
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Webhook request failed");
                HttpClientError::from_reqwest(e, timeout)
            })?;

        let status_code = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| HttpClientError::from_reqwest(e, timeout))?;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let body = truncate(
            String::from_utf8_lossy(&bytes).into_owned(),
            self.response_body_limit,
        );

        debug!(
            url = %url,
            status_code,
            duration_ms,
            "Webhook response received"
        );

        Ok(WebhookResponse {
            status_code,
            body,
            duration_ms,
        })
    }
}
