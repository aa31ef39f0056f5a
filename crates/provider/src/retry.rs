//! Provider retry wrapper — the §6 taxonomy around any inner provider.
//!
//! 429, 5xx, network, and timeout failures are retried with exponential
//! backoff for a fixed small attempt count. 401/402-class failures are
//! fatal and surfaced immediately — retrying a bad credential only burns
//! time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tiller_core::error::ProviderError;
use tiller_core::provider::{ModelProvider, ModelRequest, ModelResponse};
use tracing::warn;

/// Default attempt cap (1 initial + 2 retries).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay; doubles each retry.
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// A provider that retries transient failures of an inner provider.
pub struct RetryingProvider {
    inner: Arc<dyn ModelProvider>,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>) -> Self {
        Self {
            inner,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }

    /// Override the attempt cap.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Override the base backoff delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry after attempt number `attempt` (1-based).
    /// Rate-limit answers that name a retry window win over the schedule.
    fn delay_for(&self, attempt: u32, error: &ProviderError) -> Duration {
        if let ProviderError::RateLimited { retry_after_secs } = error {
            // Cap so a hostile header can't park the loop for minutes
            return Duration::from_secs((*retry_after_secs).min(30));
        }
        self.base_delay * 2u32.saturating_pow(attempt - 1)
    }
}

#[async_trait]
impl ModelProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_fatal() => {
                    warn!(provider = self.inner.name(), error = %e, "Fatal provider error, not retrying");
                    return Err(e);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
