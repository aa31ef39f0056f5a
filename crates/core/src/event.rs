//! Orchestration event system — decoupled observability signals.
//!
//! Events are published when something interesting happens in the loop.
//! Observability consumers (CLI status view, log sinks) subscribe and
//! filter without coupling to the engine internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All orchestration events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    /// A new task began executing.
    TaskStarted {
        task_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The model answered an iteration.
    ModelResponded {
        model: String,
        tool_call_count: usize,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was rejected by the validation layer.
    ToolRejected {
        tool: String,
        issue_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (possibly after retries).
    ToolExecuted {
        tool: String,
        success: bool,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The circuit breaker changed state.
    CircuitStateChanged {
        from: String,
        to: String,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// The loop suspended awaiting human input.
    LoopSuspended {
        task_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A suspended loop resumed.
    LoopResumed {
        task_id: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    /// History was compressed to fit the token budget.
    HistoryCompressed {
        strategy: String,
        turns_before: usize,
        turns_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A task finished.
    TaskCompleted {
        task_id: String,
        success: bool,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for orchestration events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<OrchestratorEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: OrchestratorEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OrchestratorEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(OrchestratorEvent::ToolExecuted {
            tool: "read_entry".into(),
            success: true,
            attempts: 1,
            duration_ms: 12,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            OrchestratorEvent::ToolExecuted { tool, success, .. } => {
                assert_eq!(tool, "read_entry");
                assert!(success);
            }
            _ => panic!("Expected ToolExecuted event"),
        }
    }

    #[test]
    fn publish_without_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(OrchestratorEvent::TaskStarted {
            task_id: "t-1".into(),
            timestamp: Utc::now(),
        });
    }
}
