//! Model Provider trait — the abstraction over LLM backends.
//!
//! A provider takes the system prompt, the conversation history, and the
//! tool schemas, and answers with free text plus zero or more tool calls.
//! The loop controller calls `complete()` without knowing which provider
//! is behind it — pure polymorphism.

use crate::backend::ToolSchema;
use crate::error::ProviderError;
use crate::turn::{ToolCall, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4o", "claude-sonnet-4").
    pub model: String,

    /// System prompt (identity, rules, injected context sections).
    pub system_prompt: String,

    /// Ordered conversation history.
    pub turns: Vec<Turn>,

    /// Tools the model may call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Temperature (0.0 = deterministic, 1.0 = creative).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Free-text content.
    pub text: String,

    /// Tool calls the model wants executed, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Token usage statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded.
    pub model: String,
}

impl ModelResponse {
    /// A text-only response (no tool calls) — convenient for tests.
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            usage: None,
            model: "unknown".into(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Model Provider trait.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ModelResponse, ProviderError>;

    /// Summarize a block of text (used by history compression).
    ///
    /// Default implementation routes through `complete()` with no tools.
    async fn summarize(
        &self,
        model: &str,
        text: &str,
    ) -> std::result::Result<String, ProviderError> {
        let request = ModelRequest {
            model: model.to_string(),
            system_prompt: "Summarize the following conversation segment. Keep every decision, \
                            file touched, and unresolved question. Be dense and factual."
                .into(),
            turns: vec![Turn::user(text)],
            tools: Vec::new(),
            temperature: 0.2,
            max_tokens: Some(512),
        };
        let response = self.complete(request).await?;
        Ok(response.text)
    }

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults() {
        let req = ModelRequest {
            model: "gpt-4o".into(),
            system_prompt: "You are an agent".into(),
            turns: vec![],
            tools: vec![],
            temperature: default_temperature(),
            max_tokens: None,
        };
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn text_only_response_has_no_calls() {
        let resp = ModelResponse::text_only("done");
        assert_eq!(resp.text, "done");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn request_serialization_roundtrip() {
        let req = ModelRequest {
            model: "test".into(),
            system_prompt: "sys".into(),
            turns: vec![Turn::user("hello")],
            tools: vec![],
            temperature: 0.5,
            max_tokens: Some(256),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ModelRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turns.len(), 1);
        assert_eq!(back.max_tokens, Some(256));
    }
}
