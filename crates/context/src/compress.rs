//! History compression — the fallback hierarchy behind the token budget.
//!
//! When estimated history tokens exceed the budget, the oldest segment is
//! replaced by a smaller representation. Strategies, tried in order:
//!
//! 1. **Model summary** — ask the provider to summarize the old segment;
//!    accepted only if the answer is non-trivially long.
//! 2. **Structured extraction** — deterministic enumeration of user
//!    requests, agent actions, tool usage counts, and errors. Always
//!    succeeds, so the cascade never reaches strategy 3 through normal
//!    operation.
//! 3. **Truncation** — a bare "N turns elided" note. The terminal
//!    strategy; callable directly, never silently chosen.
//!
//! The most recent `preserve_count` turns are always kept verbatim, and
//! older turns are always replaced by *some* non-empty representation —
//! never dropped outright.

use crate::token;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tiller_core::backend::ToolOutcome;
use tiller_core::provider::ModelProvider;
use tiller_core::turn::Turn;
use tracing::{debug, info, warn};

/// A model summary shorter than this is treated as a failed attempt.
const MIN_SUMMARY_CHARS: usize = 40;

/// Bounds for the structured extraction lists.
const MAX_LISTED_REQUESTS: usize = 5;
const MAX_LISTED_ERRORS: usize = 5;
const MAX_SNIPPET_CHARS: usize = 120;

/// Which strategy produced the replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStrategy {
    ModelSummary,
    StructuredExtraction,
    Truncation,
}

impl std::fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ModelSummary => "model_summary",
            Self::StructuredExtraction => "structured_extraction",
            Self::Truncation => "truncation",
        };
        write!(f, "{s}")
    }
}

/// What a compression pass did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionReport {
    pub strategy: CompressionStrategy,
    pub turns_before: usize,
    pub turns_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// The history compressor.
pub struct Compressor {
    token_budget: usize,
    preserve_count: usize,
    model: String,
}

impl Compressor {
    pub fn new(token_budget: usize, preserve_count: usize, model: impl Into<String>) -> Self {
        Self {
            token_budget,
            preserve_count: preserve_count.max(1),
            model: model.into(),
        }
    }

    /// Compress `turns` in place if the estimated token count exceeds the
    /// budget. Returns a report when compression ran.
    pub async fn compress_if_needed(
        &self,
        turns: &mut Vec<Turn>,
        provider: &dyn ModelProvider,
    ) -> Option<CompressionReport> {
        let tokens_before = token::estimate_history_tokens(turns);
        if tokens_before <= self.token_budget {
            return None;
        }
        if turns.len() <= self.preserve_count {
            // Nothing old enough to compress; the recent window is sacred.
            return None;
        }

        let turns_before = turns.len();
        let split = turns.len() - self.preserve_count;
        let old: Vec<Turn> = turns.drain(..split).collect();

        let (summary, strategy) = match self.model_summary(&old, provider).await {
            Some(text) => (text, CompressionStrategy::ModelSummary),
            None => (
                structured_extraction(&old),
                CompressionStrategy::StructuredExtraction,
            ),
        };

        turns.insert(
            0,
            Turn::user(format!("[Conversation summary — older turns compressed]\n{summary}")),
        );

        let tokens_after = token::estimate_history_tokens(turns);
        info!(
            %strategy,
            turns_before,
            turns_after = turns.len(),
            tokens_before,
            tokens_after,
            "History compressed"
        );

        Some(CompressionReport {
            strategy,
            turns_before,
            turns_after: turns.len(),
            tokens_before,
            tokens_after,
        })
    }

    /// Strategy 1: model-generated summary. `None` if the provider fails
    /// or answers with something too short to trust.
    async fn model_summary(&self, old: &[Turn], provider: &dyn ModelProvider) -> Option<String> {
        let rendered = render_segment(old);
        match provider.summarize(&self.model, &rendered).await {
            Ok(text) => {
                let trimmed = text.trim().to_string();
                if trimmed.len() >= MIN_SUMMARY_CHARS {
                    Some(trimmed)
                } else {
                    debug!(len = trimmed.len(), "Model summary too short, falling back");
                    None
                }
            }
            Err(e) => {
                warn!(error = %e, "Model summary failed, falling back to structured extraction");
                None
            }
        }
    }
}

/// Render a segment of turns as plain text for summarization.
fn render_segment(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let (label, content) = match turn {
            Turn::User { content, .. } => ("User", content.clone()),
            Turn::Agent { content, tool_calls, .. } => {
                let mut c = content.clone();
                for call in tool_calls {
                    c.push_str(&format!("\n[called {}]", call.name));
                }
                ("Agent", c)
            }
            Turn::Tool { record, .. } => ("Tool", format!("{}: {}", record.tool, record.outcome.render())),
        };
        out.push_str(&format!("{label}: {content}\n"));
    }
    out
}

/// Strategy 2: deterministic structured extraction. Always returns a
/// non-empty, bounded-length summary for any non-empty input.
pub fn structured_extraction(turns: &[Turn]) -> String {
    let mut requests: Vec<String> = Vec::new();
    let mut agent_actions = 0usize;
    let mut tool_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut errors: Vec<String> = Vec::new();

    for turn in turns {
        match turn {
            Turn::User { content, .. } => {
                if requests.len() < MAX_LISTED_REQUESTS {
                    requests.push(snippet(content));
                }
            }
            Turn::Agent { tool_calls, .. } => {
                agent_actions += 1;
                for call in tool_calls {
                    *tool_counts.entry(call.name.clone()).or_default() += 1;
                }
            }
            Turn::Tool { record, .. } => {
                if let ToolOutcome::Error { reason, .. } = &record.outcome {
                    if errors.len() < MAX_LISTED_ERRORS {
                        errors.push(format!("{}: {}", record.tool, snippet(reason)));
                    }
                }
            }
        }
    }

    let mut out = format!("Earlier segment: {} turns.\n", turns.len());

    if !requests.is_empty() {
        out.push_str("User requests:\n");
        for r in &requests {
            out.push_str(&format!("- {r}\n"));
        }
    }

    out.push_str(&format!("Agent responses: {agent_actions}.\n"));

    if !tool_counts.is_empty() {
        let usage: Vec<String> = tool_counts
            .iter()
            .map(|(tool, count)| format!("{tool}×{count}"))
            .collect();
        out.push_str(&format!("Tool usage: {}.\n", usage.join(", ")));
    }

    if !errors.is_empty() {
        out.push_str("Errors seen:\n");
        for e in &errors {
            out.push_str(&format!("- {e}\n"));
        }
    }

    out
}

/// Strategy 3: bare truncation note. Terminal fallback; the cascade never
/// reaches it because structured extraction cannot fail.
pub fn truncation_summary(turns: &[Turn]) -> String {
    format!("[{} earlier turns elided]", turns.len())
}

fn snippet(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= MAX_SNIPPET_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(MAX_SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tiller_core::error::ProviderError;
    use tiller_core::provider::{ModelRequest, ModelResponse};
    use tiller_core::turn::{ToolCall, ToolRecord};

    /// Provider whose summaries are canned.
    struct CannedProvider {
        summary: String,
        fail: bool,
    }

    #[async_trait]
    impl ModelProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: ModelRequest) -> Result<ModelResponse, ProviderError> {
            if self.fail {
                return Err(ProviderError::Network("summarizer down".into()));
            }
            Ok(ModelResponse::text_only(self.summary.clone()))
        }
    }

    fn long_history(n: usize) -> Vec<Turn> {
        let mut turns = vec![Turn::user("Please refactor the parser module to use the new grammar")];
        for i in 0..n {
            let call = ToolCall::new("read_entry", json!({"path": format!("src/file{i}.rs")}));
            let record = ToolRecord::new(
                &call,
                ToolOutcome::ok_with("content", json!("x".repeat(200))),
            );
            turns.push(Turn::agent(format!("Reading file {i}"), vec![call]));
            turns.push(Turn::tool(record));
        }
        turns
    }

    fn compressor(budget: usize) -> Compressor {
        Compressor::new(budget, 4, "test-model")
    }

    #[tokio::test]
    async fn under_budget_is_untouched() {
        let provider = CannedProvider {
            summary: "irrelevant".into(),
            fail: false,
        };
        let mut turns = vec![Turn::user("hi"), Turn::agent("hello", vec![])];
        let report = compressor(100_000).compress_if_needed(&mut turns, &provider).await;
        assert!(report.is_none());
        assert_eq!(turns.len(), 2);
    }

    #[tokio::test]
    async fn model_summary_used_when_long_enough() {
        let provider = CannedProvider {
            summary: "The user asked for a parser refactor; the agent read ten files and found the grammar \
                      definitions in src/file3.rs."
                .into(),
            fail: false,
        };
        let mut turns = long_history(10);
        let before = turns.len();

        let report = compressor(100)
            .compress_if_needed(&mut turns, &provider)
            .await
            .unwrap();

        assert_eq!(report.strategy, CompressionStrategy::ModelSummary);
        assert_eq!(report.turns_before, before);
        assert!(turns.len() < before);
        assert!(turns[0].content().contains("parser refactor"));
    }

    #[tokio::test]
    async fn short_summary_falls_back_to_extraction() {
        let provider = CannedProvider {
            summary: "ok".into(), // trivially short → rejected
            fail: false,
        };
        let mut turns = long_history(10);

        let report = compressor(100)
            .compress_if_needed(&mut turns, &provider)
            .await
            .unwrap();

        assert_eq!(report.strategy, CompressionStrategy::StructuredExtraction);
        assert!(turns[0].content().contains("Tool usage"));
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_extraction() {
        let provider = CannedProvider {
            summary: String::new(),
            fail: true,
        };
        let mut turns = long_history(10);

        let report = compressor(100)
            .compress_if_needed(&mut turns, &provider)
            .await
            .unwrap();

        assert_eq!(report.strategy, CompressionStrategy::StructuredExtraction);
    }

    #[tokio::test]
    async fn recent_turns_preserved_verbatim() {
        let provider = CannedProvider {
            summary: String::new(),
            fail: true,
        };
        let mut turns = long_history(10);
        let preserve: Vec<String> = turns[turns.len() - 4..]
            .iter()
            .map(|t| t.content())
            .collect();

        compressor(100)
            .compress_if_needed(&mut turns, &provider)
            .await
            .unwrap();

        let tail: Vec<String> = turns[turns.len() - 4..]
            .iter()
            .map(|t| t.content())
            .collect();
        assert_eq!(preserve, tail, "preserved window must be byte-identical");
    }

    #[tokio::test]
    async fn too_short_history_never_compressed() {
        let provider = CannedProvider {
            summary: String::new(),
            fail: true,
        };
        // Over budget but only preserve_count turns exist
        let mut turns = vec![
            Turn::user("x".repeat(4000)),
            Turn::agent("y".repeat(4000), vec![]),
        ];
        let report = compressor(10).compress_if_needed(&mut turns, &provider).await;
        assert!(report.is_none());
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn extraction_nonempty_for_any_nonempty_input() {
        let single = vec![Turn::user("just one turn")];
        let summary = structured_extraction(&single);
        assert!(!summary.trim().is_empty());
        assert!(summary.contains("1 turns"));
    }

    #[test]
    fn extraction_is_bounded() {
        // Hundreds of long turns must still produce a bounded summary
        let mut turns = Vec::new();
        for i in 0..300 {
            turns.push(Turn::user(format!("request {i}: {}", "w".repeat(500))));
        }
        let summary = structured_extraction(&turns);
        assert!(summary.len() < 2000, "summary length {} not bounded", summary.len());
    }

    #[test]
    fn extraction_counts_tools_and_errors() {
        let call_a = ToolCall::new("read_entry", json!({}));
        let call_b = ToolCall::new("read_entry", json!({}));
        let call_c = ToolCall::new("patch_entry", json!({}));
        let err_record = ToolRecord::new(&call_c, ToolOutcome::error("ambiguous match"));

        let turns = vec![
            Turn::user("fix it"),
            Turn::agent("reading", vec![call_a, call_b]),
            Turn::agent("patching", vec![call_c]),
            Turn::tool(err_record),
        ];

        let summary = structured_extraction(&turns);
        assert!(summary.contains("read_entry×2"));
        assert!(summary.contains("patch_entry×1"));
        assert!(summary.contains("ambiguous match"));
    }

    #[test]
    fn truncation_names_the_count() {
        let turns = vec![Turn::user("a"), Turn::user("b")];
        assert_eq!(truncation_summary(&turns), "[2 earlier turns elided]");
    }
}
