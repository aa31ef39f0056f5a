//! Per-tool health metrics — rolling success windows.
//!
//! Maintains a bounded window of recent outcomes per tool and exposes a
//! percentage success rate. This is an observability signal for the UI
//! and the `status` command; it never gates execution (that's the
//! circuit breaker's job).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Health summary for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHealth {
    pub tool: String,
    /// Outcomes currently in the window.
    pub samples: usize,
    /// Successes in the window.
    pub successes: usize,
    /// Success rate over the window, 0.0–1.0.
    pub success_rate: f64,
}

/// Rolling per-tool outcome windows.
pub struct HealthTracker {
    window: usize,
    outcomes: Mutex<HashMap<String, VecDeque<bool>>>,
}

impl HealthTracker {
    /// Create a tracker with the given per-tool window size.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    /// Record one outcome for a tool.
    pub fn record(&self, tool: &str, success: bool) {
        let mut outcomes = self.outcomes.lock().unwrap();
        let window = outcomes
            .entry(tool.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.window));
        window.push_back(success);
        if window.len() > self.window {
            window.pop_front();
        }
    }

    /// The success rate for one tool, if it has any samples.
    pub fn success_rate(&self, tool: &str) -> Option<f64> {
        let outcomes = self.outcomes.lock().unwrap();
        let window = outcomes.get(tool)?;
        if window.is_empty() {
            return None;
        }
        let successes = window.iter().filter(|s| **s).count();
        Some(successes as f64 / window.len() as f64)
    }

    /// A health summary for every tracked tool, sorted by name.
    pub fn snapshot(&self) -> Vec<ToolHealth> {
        let outcomes = self.outcomes.lock().unwrap();
        let mut report: Vec<ToolHealth> = outcomes
            .iter()
            .map(|(tool, window)| {
                let successes = window.iter().filter(|s| **s).count();
                ToolHealth {
                    tool: tool.clone(),
                    samples: window.len(),
                    successes,
                    success_rate: if window.is_empty() {
                        0.0
                    } else {
                        successes as f64 / window.len() as f64
                    },
                }
            })
            .collect();
        report.sort_by(|a, b| a.tool.cmp(&b.tool));
        report
    }

    /// Clear all windows (session-scope reset).
    pub fn clear(&self) {
        self.outcomes.lock().unwrap().clear();
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples_no_rate() {
        let tracker = HealthTracker::new(10);
        assert!(tracker.success_rate("read_entry").is_none());
    }

    #[test]
    fn rate_reflects_window() {
        let tracker = HealthTracker::new(10);
        tracker.record("patch_entry", true);
        tracker.record("patch_entry", true);
        tracker.record("patch_entry", false);
        tracker.record("patch_entry", true);

        let rate = tracker.success_rate("patch_entry").unwrap();
        assert!((rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn window_is_bounded() {
        let tracker = HealthTracker::new(3);
        tracker.record("t", false);
        tracker.record("t", false);
        tracker.record("t", true);
        tracker.record("t", true); // pushes out the first false

        let rate = tracker.success_rate("t").unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_sorted_by_tool() {
        let tracker = HealthTracker::new(5);
        tracker.record("zeta", true);
        tracker.record("alpha", false);

        let report = tracker.snapshot();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].tool, "alpha");
        assert_eq!(report[1].tool, "zeta");
        assert_eq!(report[0].successes, 0);
        assert_eq!(report[1].successes, 1);
    }

    #[test]
    fn clear_empties_everything() {
        let tracker = HealthTracker::new(5);
        tracker.record("t", true);
        tracker.clear();
        assert!(tracker.success_rate("t").is_none());
        assert!(tracker.snapshot().is_empty());
    }
}
