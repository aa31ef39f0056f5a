//! Conversation turns — the append-only history the loop operates on.
//!
//! A turn is one of: a user request, an agent response (which may carry
//! tool calls), or a tool record. The history invariant: every `ToolCall`
//! in an agent turn gets exactly one matching `ToolRecord` appended before
//! the loop advances to the next iteration.

use crate::backend::ToolOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task — one user message and its loop execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structured request from the agent naming a tool and its arguments.
///
/// Produced only by the Model Provider; immutable once issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the provider's tool_call id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    /// Fetch a string argument by key, if present.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// The recorded result of one tool call, folded back into history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Which tool call this record answers
    pub call_id: String,

    /// The tool that produced it
    pub tool: String,

    /// The (sanitized) outcome
    pub outcome: ToolOutcome,
}

impl ToolRecord {
    pub fn new(call: &ToolCall, outcome: ToolOutcome) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            outcome,
        }
    }
}

/// A single entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Turn {
    /// The user's request.
    User {
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent's response; may carry zero or more tool calls.
    Agent {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        timestamp: DateTime<Utc>,
    },

    /// One tool call's recorded outcome.
    Tool {
        record: ToolRecord,
        timestamp: DateTime<Utc>,
    },
}

impl Turn {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an agent turn with optional tool calls.
    pub fn agent(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Agent {
            content: content.into(),
            tool_calls,
            timestamp: Utc::now(),
        }
    }

    /// Create a tool record turn.
    pub fn tool(record: ToolRecord) -> Self {
        Self::Tool {
            record,
            timestamp: Utc::now(),
        }
    }

    /// The free-text content of this turn (tool turns render their outcome).
    pub fn content(&self) -> String {
        match self {
            Self::User { content, .. } | Self::Agent { content, .. } => content.clone(),
            Self::Tool { record, .. } => record.outcome.render(),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_agent(&self) -> bool {
        matches!(self, Self::Agent { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::User { timestamp, .. }
            | Self::Agent { timestamp, .. }
            | Self::Tool { timestamp, .. } => *timestamp,
        }
    }
}

/// Check the history invariant: every tool call in an agent turn is
/// answered by exactly one tool record before the next agent turn.
pub fn history_is_balanced(turns: &[Turn]) -> bool {
    let mut outstanding: Vec<&str> = Vec::new();

    for turn in turns {
        match turn {
            Turn::Agent { tool_calls, .. } => {
                if !outstanding.is_empty() {
                    return false;
                }
                outstanding = tool_calls.iter().map(|c| c.id.as_str()).collect();
            }
            Turn::Tool { record, .. } => {
                match outstanding.iter().position(|id| *id == record.call_id) {
                    Some(pos) => {
                        outstanding.remove(pos);
                    }
                    None => return false,
                }
            }
            Turn::User { .. } => {
                if !outstanding.is_empty() {
                    return false;
                }
            }
        }
    }

    outstanding.is_empty()
}
