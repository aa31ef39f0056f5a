//! Error types for the Tiller domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! The taxonomy matters for recovery: `BackendError` carries the
//! retryable/non-retryable distinction the resilience layer acts on,
//! `ProviderError` carries the fatal/transient split for model calls,
//! and `EngineError` holds the only failures that terminate a task.

use thiserror::Error;

/// The top-level error type for all Tiller operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Loop controller errors ---
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    // --- Working memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Persistent store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Payment required / quota exhausted: {0}")]
    PaymentRequired(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Credential-class failures are fatal to the whole task and must
    /// never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::PaymentRequired(_) | Self::NotConfigured(_)
        )
    }

    /// Transient failures worth another attempt with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

/// Transport-level failures from the Tool Backend.
///
/// Semantic failures (tool ran, target logic failed) are NOT errors —
/// they come back as `ToolOutcome::Error` and are surfaced to the model
/// verbatim. This enum covers only the cases where the backend itself
/// could not complete the request.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool timed out: {tool} after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("Backend rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown pending operation: {0}")]
    UnknownOperation(String),

    #[error("Pending operation expired: {0}")]
    OperationExpired(String),

    #[error("Backend internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Timeout/rate-limit-like failures are retried with backoff; the
    /// rest are returned to the caller on the first occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }
}

/// Failures owned by the Loop Controller.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Iteration cap exceeded after {iterations} iterations")]
    IterationCapExceeded { iterations: u32 },

    #[error("Stale operation: paused task {paused_task} does not match active task {active_task}")]
    StaleOperation {
        paused_task: String,
        active_task: String,
    },

    #[error("No suspended state to resume")]
    NothingToResume,

    #[error("Resume decision does not match the suspension: expected {expected}")]
    ResumeMismatch { expected: String },

    #[error("Provider failure was fatal: {0}")]
    FatalProvider(#[from] ProviderError),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Unknown memory item: {0}")]
    UnknownItem(String),

    #[error("Memory tier full: {tier} holds {count} items")]
    TierFull { tier: String, count: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt document: {0}")]
    Corrupt(String),
}
