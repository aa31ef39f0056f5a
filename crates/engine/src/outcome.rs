//! Loop outcomes — the four ways a task leaves the controller.

use serde::{Deserialize, Serialize};
use tiller_core::error::EngineError;

/// What the caller receives when the loop yields.
#[derive(Debug)]
pub enum IterationOutcome {
    /// The model answered with text only; the task is complete.
    Done(String),

    /// The task failed terminally (iteration cap, credential failure).
    Fatal(EngineError),

    /// A dangerous operation awaits human approval.
    AwaitingApproval(ApprovalRequest),

    /// The agent asked the human a verification question.
    AwaitingFeedback(FeedbackRequest),
}

impl IterationOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Fatal(_))
    }
}

/// Handed to the approval UI when the loop suspends on a pending
/// operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// The backend's pending-operation id; pass back to `resume`.
    pub operation_id: String,

    /// Which tool is parked.
    pub tool: String,

    /// Human-readable description of the deferred side effect.
    pub description: String,

    /// The deferred arguments, for display.
    pub payload: serde_json::Value,
}

/// Handed to the feedback UI when the agent asks a verification question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// The question for the human.
    pub question: String,

    /// Supporting context.
    #[serde(default)]
    pub context: String,

    /// What kind of verification is sought ("confirm", "choose", ...).
    #[serde(default)]
    pub verification_type: String,

    /// Suggested answers, if the agent offered any.
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(IterationOutcome::Done("ok".into()).is_terminal());
        assert!(
            IterationOutcome::Fatal(EngineError::IterationCapExceeded { iterations: 25 })
                .is_terminal()
        );
        assert!(
            !IterationOutcome::AwaitingFeedback(FeedbackRequest {
                question: "sure?".into(),
                context: String::new(),
                verification_type: String::new(),
                suggestions: vec![],
            })
            .is_terminal()
        );
    }

    #[test]
    fn feedback_request_deserializes_with_defaults() {
        let req: FeedbackRequest =
            serde_json::from_str(r#"{"question": "Proceed with the rename?"}"#).unwrap();
        assert_eq!(req.question, "Proceed with the rename?");
        assert!(req.suggestions.is_empty());
    }
}
