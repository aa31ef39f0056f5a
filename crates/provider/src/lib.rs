//! Model Provider implementations.
//!
//! - [`OpenAiCompatProvider`] — HTTP client for any OpenAI-compatible
//!   `/v1/chat/completions` endpoint (OpenAI, OpenRouter, Ollama, vLLM…).
//! - [`RetryingProvider`] — wraps any provider with the retry taxonomy:
//!   429/5xx/network/timeout retried with exponential backoff,
//!   credential-class failures surfaced immediately.
//! - [`ScriptedProvider`] — deterministic canned responses for tests and
//!   offline demo runs.

pub mod openai_compat;
pub mod retry;
pub mod scripted;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryingProvider;
pub use scripted::ScriptedProvider;
