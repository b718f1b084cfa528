//! HTTP sender with retry.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};
use upload_queue::{Transport, TransportError};

/// Sender configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Maximum attempts per batch, including the first.
    pub max_retries: u32,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            initial_retry_delay_ms: 1000,
            max_retry_delay_ms: 60000,
            max_retries: 3,
            auth_token: None,
        }
    }
}

impl SenderConfig {
    /// Delay before the attempt following one that waited `delay_ms`.
    fn next_delay(&self, delay_ms: u64) -> u64 {
        delay_ms.saturating_mul(2).min(self.max_retry_delay_ms)
    }
}

/// `Transport` that POSTs batches as JSON over HTTP(S).
///
/// Connection failures, timeouts, 408/429 and 5xx answers are retried with
/// exponential backoff. Other statuses and non-JSON bodies fail at once.
pub struct HttpTransport {
    config: SenderConfig,
    client: Client,
}

impl HttpTransport {
    pub fn new(config: SenderConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("upload-queue/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Single attempt.
    async fn try_post(&self, url: &str, batch: &[Value]) -> Result<Value, TransportError> {
        let mut request = self.client.post(url).json(batch);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| TransportError::InvalidResponse(format!("body is not JSON: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, batch: &[Value]) -> Result<Value, TransportError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;
        let mut delay = self.config.initial_retry_delay_ms;

        loop {
            attempt += 1;
            debug!(url = %url, records = batch.len(), attempt, "Posting batch");

            let err = match self.try_post(url, batch).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !err.is_retryable() {
                warn!(url = %url, attempt, error = %err, "Batch rejected");
                return Err(err);
            }

            if attempt >= max_attempts {
                error!(url = %url, attempt, error = %err, "Max retries exceeded");
                return Err(TransportError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            warn!(
                url = %url,
                attempt,
                delay_ms = delay,
                error = %err,
                "Post failed, retrying"
            );

            tokio::time::sleep(Duration::from_millis(delay)).await;
            delay = self.config.next_delay(delay);
        }
    }
}
