//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. This
//! approximation is accurate within ~10% for BPE tokenizers on English
//! text, which is plenty for budget decisions — the compressor triggers
//! on a threshold, not an exact count.

use tiller_core::backend::ToolSchema;
use tiller_core::turn::Turn;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Estimate tokens for a single turn including per-message overhead.
///
/// Each turn costs ~4 tokens of overhead for role markers and delimiters
/// in the API wire format; tool calls add their serialized arguments.
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    let overhead = 4;
    let call_tokens = match turn {
        Turn::Agent { tool_calls, .. } => tool_calls
            .iter()
            .map(|c| {
                let args = serde_json::to_string(&c.arguments).unwrap_or_default();
                estimate_tokens(&c.name) + estimate_tokens(&args)
            })
            .sum(),
        _ => 0,
    };
    overhead + estimate_tokens(&turn.content()) + call_tokens
}

/// Estimate tokens for a slice of turns.
pub fn estimate_history_tokens(turns: &[Turn]) -> usize {
    turns.iter().map(estimate_turn_tokens).sum()
}

/// Estimate tokens for a tool schema (serialized as JSON).
pub fn estimate_schema_tokens(schema: &ToolSchema) -> usize {
    let json = serde_json::to_string(schema).unwrap_or_default();
    estimate_tokens(&json)
}
