//! The loop controller — the heart of Tiller.
//!
//! Drives the agent through a **plan → call-tools → observe** cycle:
//!
//! 1. Compress history if the token budget is exceeded
//! 2. Call the Model Provider with history + tool schemas
//! 3. No tool calls → the task is done, return the text
//! 4. Otherwise process the calls **strictly sequentially** — each one
//!    validated, gated by the circuit breaker, and executed through the
//!    resilient executor before the next starts
//! 5. A pending (dangerous) operation or a feedback question suspends the
//!    loop into a serializable [`PausedState`]; `resume` continues the
//!    batch exactly where it stopped
//!
//! The loop always terminates in one of: success text, explicit error,
//! suspended-for-approval, or suspended-for-feedback. It never hangs.

pub mod controller;
pub mod outcome;
pub mod paused;
pub mod repeat;

pub use controller::LoopController;
pub use outcome::{ApprovalRequest, FeedbackRequest, IterationOutcome};
pub use paused::{PauseReason, PausedState, ResumeDecision};
pub use repeat::RepeatTracker;
