//! Session coordination — who owns what state, and when it resets.
//!
//! Three state scopes:
//!
//! - **Persisted** — project knowledge and decision patterns; loaded at
//!   conversation start, saved at conversation end or explicit checkpoint.
//! - **Session** — one continuous conversation: circuit breaker, health
//!   windows, background memory.
//! - **Task** — one user message and its loop execution: working memory,
//!   the tools-used trace, the active task id.
//!
//! The [`SessionCoordinator`] owns all shared mutable state and exposes
//! lifecycle hooks that reset or persist exactly the modules scoped to
//! each lifecycle point. No free-standing module state anywhere.

pub mod coordinator;
pub mod store;

pub use coordinator::{SessionCoordinator, ToolGate};
pub use store::{FileStore, InMemoryStore};
