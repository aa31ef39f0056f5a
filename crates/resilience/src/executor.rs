//! Resilient tool execution — retry with backoff around the Tool Backend.
//!
//! Wraps the backend's raw `execute`: transient failures (timeout,
//! rate-limit-like) are retried up to a fixed small count with an
//! increasing backoff schedule; exhausting retries returns the last
//! error. Every final outcome is recorded to the health tracker.
//!
//! Semantic errors (`ToolOutcome::Error`) are not retried — the tool ran
//! and said no; retrying blindly would repeat the same answer. They are
//! recorded as health failures and returned to the caller for the model
//! to react to.

use crate::health::HealthTracker;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiller_config::RetryConfig;
use tiller_core::backend::{ToolBackend, ToolOutcome};
use tiller_core::error::BackendError;
use tiller_core::turn::ToolCall;
use tracing::{debug, warn};

/// The result of one resilient execution, with attempt accounting for
/// events and logs.
#[derive(Debug)]
pub struct ExecutionReport {
    /// The final result after retries.
    pub result: Result<ToolOutcome, BackendError>,
    /// Attempts made (1 = no retries needed).
    pub attempts: u32,
    /// Wall-clock duration across all attempts.
    pub duration_ms: u64,
}

impl ExecutionReport {
    /// Whether the execution counts as a success for health/breaker
    /// purposes. Pending counts as success: the tool did what it was
    /// asked — defer.
    pub fn is_success(&self) -> bool {
        matches!(
            &self.result,
            Ok(ToolOutcome::Ok { .. }) | Ok(ToolOutcome::Pending { .. })
        )
    }
}

/// Retrying executor around a Tool Backend.
pub struct ResilientExecutor {
    backend: Arc<dyn ToolBackend>,
    health: Arc<HealthTracker>,
    config: RetryConfig,
}

impl ResilientExecutor {
    pub fn new(backend: Arc<dyn ToolBackend>, health: Arc<HealthTracker>, config: RetryConfig) -> Self {
        Self {
            backend,
            health,
            config,
        }
    }

    /// Execute one tool call with timeout, retry, and health recording.
    pub async fn execute(&self, call: &ToolCall) -> ExecutionReport {
        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.tool_timeout_secs);
        let mut attempts = 0u32;

        let result = loop {
            attempts += 1;

            let attempt_result = match tokio::time::timeout(timeout, self.backend.execute(call)).await
            {
                Ok(inner) => inner,
                Err(_) => Err(BackendError::Timeout {
                    tool: call.name.clone(),
                    timeout_secs: self.config.tool_timeout_secs,
                }),
            };

            match attempt_result {
                Ok(outcome) => break Ok(outcome),
                Err(e) if e.is_retryable() && attempts <= self.config.max_retries => {
                    let delay = self.backoff_for(attempts);
                    warn!(
                        tool = %call.name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient tool failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let report = ExecutionReport {
            result,
            attempts,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        self.health.record(&call.name, report.is_success());
        debug!(
            tool = %call.name,
            attempts = report.attempts,
            success = report.is_success(),
            duration_ms = report.duration_ms,
            "Tool execution finished"
        );

        report
    }

    /// The backoff delay before retry number `retry` (1-based). The last
    /// schedule entry repeats if retries exceed the schedule length.
    fn backoff_for(&self, retry: u32) -> Duration {
        let schedule = &self.config.backoff_ms;
        let idx = (retry as usize - 1).min(schedule.len().saturating_sub(1));
        Duration::from_millis(schedule.get(idx).copied().unwrap_or(1000))
    }
}
