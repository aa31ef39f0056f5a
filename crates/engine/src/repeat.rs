//! Repeated-call detection — the model re-issuing the same action.
//!
//! Tracks a rolling window of (tool, argument-hash) pairs. When the same
//! exact call shows up `threshold` times, corrective guidance is injected
//! once instead of burning the remaining iterations on an identical loop.

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use tiller_core::turn::ToolCall;

/// Rolling window size for repeat detection.
const HISTORY_SIZE: usize = 10;

/// Guidance injected when a repeat spiral is detected.
pub const REPEAT_GUIDANCE: &str = "STOP — you are repeating the same call without progress. \
     Try a different approach: a different tool, different arguments, \
     or ask for feedback. Do not repeat the same call again.";

/// Tracks repeated identical tool calls within a task.
#[derive(Debug, Clone)]
pub struct RepeatTracker {
    threshold: usize,
    recent: VecDeque<(String, u64)>,
    /// Guidance fires once per spiral; a different call re-arms it.
    warned: bool,
}

impl RepeatTracker {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(2),
            recent: VecDeque::with_capacity(HISTORY_SIZE),
            warned: false,
        }
    }

    /// Record a call. Returns `true` when guidance should be injected.
    pub fn record(&mut self, call: &ToolCall) -> bool {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        call.arguments.to_string().hash(&mut hasher);
        let entry = (call.name.clone(), hasher.finish());

        if let Some(last) = self.recent.back() {
            if *last != entry {
                self.warned = false;
            }
        }

        self.recent.push_back(entry.clone());
        if self.recent.len() > HISTORY_SIZE {
            self.recent.pop_front();
        }

        let count = self.recent.iter().filter(|c| **c == entry).count();
        if count >= self.threshold && !self.warned {
            self.warned = true;
            return true;
        }
        false
    }

    /// Task-scope reset.
    pub fn clear(&mut self) {
        self.recent.clear();
        self.warned = false;
    }
}
