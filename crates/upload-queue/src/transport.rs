//! Network transport seam.

use crate::TransportError;
use async_trait::async_trait;

/// Sends a batch payload to a URL and returns the decoded JSON response.
///
/// Retries, TLS, timeouts and auth headers are the transport's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        batch: &[serde_json::Value],
    ) -> Result<serde_json::Value, TransportError>;
}
