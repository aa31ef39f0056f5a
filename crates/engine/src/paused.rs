//! The serializable continuation for a suspended loop.
//!
//! Suspension is a pure function of state: the remaining batch, the
//! resume index, and the records collected so far. No captured closures —
//! a `PausedState` can be serialized, shipped across a process restart,
//! and resumed, provided the task id still matches.

use crate::outcome::{ApprovalRequest, FeedbackRequest};
use serde::{Deserialize, Serialize};
use tiller_core::turn::{TaskId, ToolCall, ToolRecord};

/// Why the loop suspended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    /// A dangerous operation awaits approval.
    Approval(ApprovalRequest),
    /// The agent asked the human a question.
    Feedback(FeedbackRequest),
}

/// The continuation record. Consumed exactly once by `resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PausedState {
    /// The task this suspension belongs to. Resume rejects a mismatch.
    pub task_id: TaskId,

    /// The full batch of tool calls from the suspended iteration.
    pub batch: Vec<ToolCall>,

    /// Index of the first unprocessed call.
    pub resume_index: usize,

    /// Records collected before suspension. The last one is the
    /// placeholder for the suspended call; resume patches it with the
    /// approval/rejection or feedback outcome.
    pub collected: Vec<ToolRecord>,

    /// What the loop is waiting for.
    pub reason: PauseReason,
}

/// The human's answer to a suspension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeDecision {
    /// Approve or reject a pending operation.
    Approval {
        operation_id: String,
        approved: bool,
    },
    /// Free-text answer to a feedback question.
    Feedback { answer: String },
}
