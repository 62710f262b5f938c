//! Webhook delivery with HMAC signing and exponential-backoff retry.
//!
//! [`WebhookDelivery`] posts a JSON-encoded [`JobEvent`] to the frontend's
//! registered URL with an `X-Tessera-Signature` header. Failed attempts are
//! retried up to five times with 1/2/4/8/16 s backoff, then dropped —
//! frontends that miss a webhook fall back to status polling.

use std::time::Duration;

use tessera_core::signing::{webhook_signature, SIGNATURE_HEADER, WEBHOOK_RETRY_DELAYS_SECS};
use tokio::sync::broadcast;

use crate::bus::JobEvent;

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    /// The event could not be serialized.
    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers job events to frontend webhook endpoints.
pub struct WebhookDelivery {
    client: reqwest::Client,
    secret: String,
}

impl WebhookDelivery {
    /// Create a delivery service signing with the given shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            client,
            secret: secret.into(),
        }
    }

    /// Deliver an event to a webhook URL with retry.
    ///
    /// Returns `Ok(())` on the first successful attempt. After the last
    /// backoff the final error is returned and the event is dropped.
    pub async fn deliver(&self, url: &str, event: &JobEvent) -> Result<(), WebhookError> {
        let body = serde_json::to_string(event)?;
        let signature = webhook_signature(&self.secret, &body);

        let attempts = WEBHOOK_RETRY_DELAYS_SECS.len();
        for (attempt, delay_secs) in WEBHOOK_RETRY_DELAYS_SECS.iter().enumerate() {
            match self.try_send(url, &body, &signature).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 == attempts => {
                    tracing::error!(url, error = %e, "Webhook delivery failed after all retries");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        event = %event.event,
                        error = %e,
                        "Webhook delivery attempt failed, retrying",
                    );
                    tokio::time::sleep(Duration::from_secs(*delay_secs)).await;
                }
            }
        }
        unreachable!("delivery loop always returns")
    }

    /// Execute a single signed POST and check the response status.
    async fn try_send(&self, url: &str, body: &str, signature: &str) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookDispatcher
// ---------------------------------------------------------------------------

/// Bus subscriber that fans events out to their registered webhooks.
///
/// Deliveries are fire-and-forget: each one runs in its own task so a slow
/// endpoint cannot stall the subscription.
pub struct WebhookDispatcher;

impl WebhookDispatcher {
    /// Consume events until the bus is dropped.
    pub async fn run(secret: String, mut rx: broadcast::Receiver<JobEvent>) {
        let delivery = std::sync::Arc::new(WebhookDelivery::new(secret));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(url) = event.webhook_url.clone() else {
                        continue;
                    };
                    let delivery = std::sync::Arc::clone(&delivery);
                    tokio::spawn(async move {
                        let _ = delivery.deliver(&url, &event).await;
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Webhook dispatcher lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, webhook dispatcher stopping");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_does_not_panic() {
        let _delivery = WebhookDelivery::new("secret");
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[test]
    fn signature_covers_the_exact_body() {
        use tessera_core::lifecycle::JobStatus;
        use tessera_core::types::JobId;

        let event = JobEvent::new(JobStatus::Completed, JobId::new_v4(), serde_json::json!({}));
        let body = serde_json::to_string(&event).unwrap();
        let sig = webhook_signature("secret", &body);
        assert!(sig.starts_with("sha256="));
    }
}
