//! Circuit breaker — the session-wide failure-spiral guard.
//!
//! State machine: **Closed** (failures counted, success resets the
//! counter) → **Open** after N consecutive failures → **HalfOpen** after
//! a cooldown, admitting exactly one trial call → back to Closed on trial
//! success, back to Open on trial failure. While open, `can_proceed()`
//! returns false and the loop controller surfaces the block to the model
//! as an error result instead of executing.
//!
//! This is a hard safety boundary distinct from per-tool retries: retries
//! handle one flaky call, the breaker handles the agent spiralling.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

/// The three circuit modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitMode {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        write!(f, "{s}")
    }
}

/// A snapshot of one circuit's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub mode: CircuitMode,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    /// Whether the half-open trial slot is taken.
    #[serde(default)]
    pub trial_in_flight: bool,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            mode: CircuitMode::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

/// The session-wide circuit breaker.
///
/// Thread-safe via interior `Mutex`; the loop is sequential, but the
/// breaker is shared behind an `Arc` between the coordinator and the
/// engine.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<CircuitState>,
    /// Per-tool circuits — optional extension, populated only when enabled.
    tool_states: Option<Mutex<HashMap<String, CircuitState>>>,
}

impl CircuitBreaker {
    /// Create a breaker with the given threshold and cooldown.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(CircuitState::default()),
            tool_states: None,
        }
    }

    /// Create a breaker from configuration.
    pub fn from_config(config: &tiller_config::BreakerConfig) -> Self {
        let mut breaker = Self::new(
            config.failure_threshold,
            Duration::seconds(config.cooldown_secs as i64),
        );
        if config.per_tool {
            breaker.tool_states = Some(Mutex::new(HashMap::new()));
        }
        breaker
    }

    /// Whether execution may proceed right now.
    ///
    /// Handles the time-driven Open → HalfOpen transition, and enforces
    /// the single-trial rule while half-open.
    pub fn can_proceed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        Self::admit(&mut state, self.cooldown)
    }

    /// Per-tool variant of `can_proceed`. Falls back to the global answer
    /// when per-tool circuits are disabled.
    pub fn can_proceed_tool(&self, tool: &str) -> bool {
        if !self.can_proceed() {
            return false;
        }
        match &self.tool_states {
            Some(states) => {
                let mut states = states.lock().unwrap();
                let state = states.entry(tool.to_string()).or_default();
                Self::admit(state, self.cooldown)
            }
            None => true,
        }
    }

    fn admit(state: &mut CircuitState, cooldown: Duration) -> bool {
        match state.mode {
            CircuitMode::Closed => true,
            CircuitMode::Open => {
                let elapsed = state
                    .opened_at
                    .map(|t| Utc::now().signed_duration_since(t))
                    .unwrap_or_else(Duration::zero);
                if elapsed >= cooldown {
                    info!("Circuit cooldown elapsed, admitting one trial call");
                    state.mode = CircuitMode::HalfOpen;
                    state.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitMode::HalfOpen => {
                if state.trial_in_flight {
                    false
                } else {
                    state.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful execution.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        if state.mode == CircuitMode::HalfOpen {
            info!("Trial call succeeded, closing circuit");
        }
        *state = CircuitState::default();
    }

    /// Record a failed execution. Returns `true` if this failure opened
    /// the circuit.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.mode {
            CircuitMode::HalfOpen => {
                warn!("Trial call failed, reopening circuit");
                state.mode = CircuitMode::Open;
                state.opened_at = Some(Utc::now());
                state.trial_in_flight = false;
                true
            }
            CircuitMode::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.threshold {
                    warn!(
                        failures = state.consecutive_failures,
                        threshold = self.threshold,
                        "Failure threshold reached, opening circuit"
                    );
                    state.mode = CircuitMode::Open;
                    state.opened_at = Some(Utc::now());
                    true
                } else {
                    false
                }
            }
            CircuitMode::Open => false,
        }
    }

    /// Per-tool variant of success recording.
    pub fn record_success_tool(&self, tool: &str) {
        self.record_success();
        if let Some(states) = &self.tool_states {
            let mut states = states.lock().unwrap();
            states.insert(tool.to_string(), CircuitState::default());
        }
    }

    /// Per-tool variant of failure recording.
    pub fn record_failure_tool(&self, tool: &str) -> bool {
        let opened = self.record_failure();
        if let Some(states) = &self.tool_states {
            let mut states = states.lock().unwrap();
            let state = states.entry(tool.to_string()).or_default();
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.threshold && state.mode == CircuitMode::Closed {
                state.mode = CircuitMode::Open;
                state.opened_at = Some(Utc::now());
            }
        }
        opened
    }

    /// Human intervention: reset everything to closed.
    pub fn force_reset(&self) {
        info!("Circuit breaker force-reset");
        *self.state.lock().unwrap() = CircuitState::default();
        if let Some(states) = &self.tool_states {
            states.lock().unwrap().clear();
        }
    }

    /// The current global mode.
    pub fn mode(&self) -> CircuitMode {
        self.state.lock().unwrap().mode
    }

    /// A full snapshot of the global circuit.
    pub fn snapshot(&self) -> CircuitState {
        self.state.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_ms: i64) -> CircuitBreaker {
        CircuitBreaker::new(threshold, Duration::milliseconds(cooldown_ms))
    }

    #[test]
    fn stays_closed_below_threshold() {
        let cb = breaker(5, 30_000);
        for _ in 0..4 {
            assert!(!cb.record_failure());
            assert!(cb.can_proceed());
        }
        assert_eq!(cb.mode(), CircuitMode::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 4);
    }

    #[test]
    fn opens_exactly_once_at_threshold() {
        let cb = breaker(5, 30_000);
        for _ in 0..4 {
            assert!(!cb.record_failure());
        }
        // The threshold-th failure opens the circuit, exactly once
        assert!(cb.record_failure());
        assert_eq!(cb.mode(), CircuitMode::Open);
        assert!(!cb.can_proceed());

        // Further failures while open do not re-open
        assert!(!cb.record_failure());
    }

    #[test]
    fn success_resets_counter() {
        let cb = breaker(3, 30_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);

        // Needs a fresh run of 3 to open
        cb.record_failure();
        cb.record_failure();
        assert!(cb.record_failure());
        assert_eq!(cb.mode(), CircuitMode::Open);
    }

    #[test]
    fn half_open_after_cooldown_admits_one_trial() {
        let cb = breaker(1, 10);
        cb.record_failure();
        assert_eq!(cb.mode(), CircuitMode::Open);
        assert!(!cb.can_proceed());

        std::thread::sleep(std::time::Duration::from_millis(20));

        // Cooldown elapsed: one trial call admitted
        assert!(cb.can_proceed());
        assert_eq!(cb.mode(), CircuitMode::HalfOpen);
        // No second trial while the first is in flight
        assert!(!cb.can_proceed());
    }

    #[test]
    fn trial_success_closes() {
        let cb = breaker(1, 0);
        cb.record_failure();
        assert!(cb.can_proceed()); // zero cooldown → immediate trial
        cb.record_success();
        assert_eq!(cb.mode(), CircuitMode::Closed);
        assert!(cb.can_proceed());
    }

    #[test]
    fn trial_failure_reopens() {
        let cb = breaker(1, 0);
        cb.record_failure();
        assert!(cb.can_proceed());
        assert!(cb.record_failure());
        assert_eq!(cb.mode(), CircuitMode::Open);
    }

    #[test]
    fn force_reset_closes_immediately() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        assert!(!cb.can_proceed());
        cb.force_reset();
        assert_eq!(cb.mode(), CircuitMode::Closed);
        assert!(cb.can_proceed());
    }

    #[test]
    fn per_tool_circuits_track_independently() {
        let config = tiller_config::BreakerConfig {
            failure_threshold: 2,
            cooldown_secs: 60,
            per_tool: true,
        };
        let cb = CircuitBreaker::from_config(&config);

        cb.record_failure_tool("patch_entry");
        cb.record_success(); // keeps the global circuit closed
        cb.record_failure_tool("patch_entry");

        // Global circuit is closed but the tool circuit is open
        assert!(cb.can_proceed());
        assert!(!cb.can_proceed_tool("patch_entry"));
        assert!(cb.can_proceed_tool("read_entry"));
    }

    #[test]
    fn state_snapshot_serializes() {
        let cb = breaker(1, 1000);
        cb.record_failure();
        let snapshot = cb.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"open\""));
        let back: CircuitState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, CircuitMode::Open);
    }
}
