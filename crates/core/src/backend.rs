//! Tool Backend contract — the abstraction over the external workspace.
//!
//! The backend executes named operations against a stateful workspace and
//! answers with a closed `ToolOutcome`: success data, a semantic error the
//! agent can react to, or a pending marker for operations that need human
//! approval. Transport failures (timeout, unavailable) are `BackendError`
//! and handled by the resilience layer, never shown to the model raw.

use crate::error::BackendError;
use crate::turn::ToolCall;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a tool does to the workspace. Drives the guard's existence checks:
/// Read/Modify/Delete require the target to exist, Create requires the
/// parent to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Create,
    Modify,
    Delete,
    Query,
}

/// Static declaration of one tool: its name, what it needs, and whether
/// its side effect is deferred for approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name (e.g., "read_entry", "patch_entry").
    pub name: String,

    /// Description sent to the model.
    pub description: String,

    /// What this operation does to the workspace.
    pub kind: OperationKind,

    /// Argument names that must be present.
    pub required: Vec<String>,

    /// The argument naming the workspace target, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,

    /// Arguments carrying free-form content, subject to placeholder and
    /// structure checks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_fields: Vec<String>,

    /// Whether execution is deferred until a human approves.
    #[serde(default)]
    pub dangerous: bool,

    /// JSON Schema for the arguments, sent to the model.
    pub parameters: serde_json::Value,
}

/// The closed result type for a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool ran and produced data.
    Ok {
        #[serde(default)]
        data: serde_json::Map<String, serde_json::Value>,
    },

    /// The tool ran but its target logic failed (ambiguous match, target
    /// exists, etc.). Surfaced verbatim to the model with an optional hint.
    Error {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hint: Option<String>,
    },

    /// The side effect is deferred until a human approves it.
    Pending { operation_id: String },
}

impl ToolOutcome {
    /// An empty success.
    pub fn ok_empty() -> Self {
        Self::Ok {
            data: serde_json::Map::new(),
        }
    }

    /// A success with a single named field.
    pub fn ok_with(key: &str, value: serde_json::Value) -> Self {
        let mut data = serde_json::Map::new();
        data.insert(key.to_string(), value);
        Self::Ok { data }
    }

    /// A semantic error without a hint.
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
            hint: None,
        }
    }

    /// A semantic error with a recovery hint for the model.
    pub fn error_with_hint(reason: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// Render the outcome as text for folding into conversation history.
    pub fn render(&self) -> String {
        match self {
            Self::Ok { data } => {
                if data.is_empty() {
                    "ok".to_string()
                } else {
                    serde_json::to_string(data).unwrap_or_else(|_| "ok".to_string())
                }
            }
            Self::Error { reason, hint } => match hint {
                Some(h) => format!("Error: {reason}\nHint: {h}"),
                None => format!("Error: {reason}"),
            },
            Self::Pending { operation_id } => {
                format!("Pending approval (operation {operation_id})")
            }
        }
    }

    /// Sanitize the outcome before it enters history: bound every string
    /// to `max_len` characters and stringify non-scalar values so the
    /// history stays serializable and small.
    pub fn sanitized(self, max_len: usize) -> Self {
        match self {
            Self::Ok { data } => {
                let data = data
                    .into_iter()
                    .map(|(k, v)| (k, sanitize_value(v, max_len)))
                    .collect();
                Self::Ok { data }
            }
            Self::Error { reason, hint } => Self::Error {
                reason: truncate(reason, max_len),
                hint: hint.map(|h| truncate(h, max_len)),
            },
            pending => pending,
        }
    }
}

fn truncate(s: String, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s;
    }
    let cut: String = s.chars().take(max_len).collect();
    format!("{cut}… [truncated]")
}

fn sanitize_value(value: serde_json::Value, max_len: usize) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(truncate(s, max_len)),
        Value::Null | Value::Bool(_) | Value::Number(_) => value,
        other => {
            // Arrays and objects are stringified so history entries stay flat
            let rendered = serde_json::to_string(&other).unwrap_or_default();
            Value::String(truncate(rendered, max_len))
        }
    }
}

/// Status of a deferred operation in the approval queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// A tool call whose side effect awaits human approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation ID.
    pub id: String,

    /// The tool whose execution is deferred.
    pub tool: String,

    /// The deferred arguments.
    pub payload: serde_json::Value,

    /// Current status.
    pub status: PendingStatus,

    /// When the operation was queued.
    pub created_at: DateTime<Utc>,

    /// Seconds after which the operation expires unapproved.
    pub ttl_secs: u64,
}

impl PendingOperation {
    pub fn new(tool: impl Into<String>, payload: serde_json::Value, ttl_secs: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool: tool.into(),
            payload,
            status: PendingStatus::Pending,
            created_at: Utc::now(),
            ttl_secs,
        }
    }

    /// Whether the TTL has elapsed as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_seconds() >= self.ttl_secs as i64
    }
}

/// The Tool Backend contract.
///
/// `execute` answers with a `ToolOutcome` for everything the tool itself
/// decides, and `Err(BackendError)` only for transport-level failures the
/// resilience layer may retry. Dangerous operations answer
/// `ToolOutcome::Pending` and park the side effect in the approval queue
/// until `resolve_pending` is called.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// The static schemas of every tool this backend offers.
    fn schemas(&self) -> Vec<ToolSchema>;

    /// Execute one tool call.
    async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolOutcome, BackendError>;

    /// Apply or discard a parked side effect.
    async fn resolve_pending(
        &self,
        operation_id: &str,
        approved: bool,
    ) -> std::result::Result<ToolOutcome, BackendError>;

    /// List operations still awaiting approval.
    async fn pending_operations(&self) -> Vec<PendingOperation>;
}

/// Existence oracle over workspace targets, consumed by the guard for
/// pre-flight plausibility checks and nearest-target suggestions.
pub trait TargetIndex: Send + Sync {
    /// Whether a target currently exists in the workspace.
    fn contains(&self, target: &str) -> bool;

    /// All known targets (used for similarity suggestions).
    fn targets(&self) -> Vec<String>;

    /// The parent of a target path, if the path has one.
    fn parent_of(&self, target: &str) -> Option<String> {
        let trimmed = target.trim_end_matches('/');
        trimmed.rfind('/').map(|idx| trimmed[..idx].to_string())
    }
}
