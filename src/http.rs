//! Shared HTTP plumbing for the hosted embedding and generation APIs.
//!
//! Calls made while serving a review use [`REQUEST_PATH_RETRIES`], so each
//! one is sent exactly once. Only ingestion configures retries.
//!
//! Retry strategy when `max_retries > 0`:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Timeouts → fail immediately with [`ReviewError::Timeout`]
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{debug, warn};

use task_review_core::ReviewError;

/// Retry budget for generation and query embeddings.
pub const REQUEST_PATH_RETRIES: u32 = 0;

pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build HTTP client")
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// A JSON POST to one endpoint, retried per the module docs.
pub struct JsonPost<'a> {
    pub client: &'a reqwest::Client,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    /// Label for errors and logs, e.g. `"Gemini embeddings"`.
    pub operation: &'a str,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl JsonPost<'_> {
    pub async fn send(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(operation = self.operation, attempt, ?delay, "retrying");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json");
            for (name, value) in &self.headers {
                request = request.header(*name, value.as_str());
            }

            match request.json(body).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.with_context(|| {
                            format!("{} returned an unreadable response", self.operation)
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(operation = self.operation, %status, "transient API error");
                        last_err = Some(anyhow::anyhow!(
                            "{} error {}: {}",
                            self.operation,
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!("{} error {}: {}", self.operation, status, body_text);
                }
                Err(e) if e.is_timeout() => {
                    return Err(ReviewError::Timeout {
                        operation: self.operation.to_string(),
                        seconds: self.timeout_secs,
                    }
                    .into());
                }
                Err(e) => {
                    warn!(operation = self.operation, error = %e, "request failed");
                    last_err = Some(anyhow::anyhow!("{} request failed: {}", self.operation, e));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", self.operation)))
    }
}

/// Read a required API key from the environment.
pub fn api_key(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", var),
    }
}
