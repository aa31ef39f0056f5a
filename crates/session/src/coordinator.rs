//! The session coordinator — lifecycle hooks over scoped state.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tiller_config::AppConfig;
use tiller_context::memory::{MemoryItem, WorkingMemory};
use tiller_context::relevance::{CandidateItem, RelevanceSelector, ScoredItem};
use tiller_core::backend::{OperationKind, ToolSchema};
use tiller_core::event::{EventBus, OrchestratorEvent};
use tiller_core::store::{DecisionPattern, KnowledgeStore, ProjectKnowledge};
use tiller_core::turn::{TaskId, ToolCall};
use tiller_guard::Validation;
use tiller_resilience::breaker::{CircuitBreaker, CircuitMode};
use tiller_resilience::executor::ExecutionReport;
use tiller_resilience::health::HealthTracker;
use tracing::{info, warn};

/// The gate verdict from `before_tool_execution`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolGate {
    /// Execution may proceed.
    Proceed,
    /// The circuit is open; surface the block instead of executing.
    CircuitOpen,
}

/// Owns all shared mutable state for one session and fires the lifecycle
/// hooks that reset or persist the right modules at the right time.
pub struct SessionCoordinator {
    breaker: Arc<CircuitBreaker>,
    health: Arc<HealthTracker>,
    events: Arc<EventBus>,
    store: Arc<dyn KnowledgeStore>,

    memory: Mutex<WorkingMemory>,
    knowledge: Mutex<ProjectKnowledge>,
    patterns: Mutex<Vec<DecisionPattern>>,

    // Task scope
    current_task: Mutex<Option<TaskId>>,
    tools_used: Mutex<Vec<String>>,

    // Session-scoped relevance tracking over touched targets
    selector: RelevanceSelector,
    candidates: Mutex<HashMap<String, CandidateItem>>,
    schema_kinds: Mutex<HashMap<String, (OperationKind, Option<String>)>>,

    // For circuit-transition events
    last_published_mode: Mutex<CircuitMode>,
    per_tool_circuits: bool,
}

impl SessionCoordinator {
    pub fn new(config: &AppConfig, store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            breaker: Arc::new(CircuitBreaker::from_config(&config.breaker)),
            health: Arc::new(HealthTracker::new(config.retry.health_window)),
            events: Arc::new(EventBus::default()),
            store,
            memory: Mutex::new(WorkingMemory::from_config(&config.context)),
            knowledge: Mutex::new(ProjectKnowledge::default()),
            patterns: Mutex::new(Vec::new()),
            current_task: Mutex::new(None),
            tools_used: Mutex::new(Vec::new()),
            selector: RelevanceSelector::new(config.context.top_k),
            candidates: Mutex::new(HashMap::new()),
            schema_kinds: Mutex::new(HashMap::new()),
            last_published_mode: Mutex::new(CircuitMode::Closed),
            per_tool_circuits: config.breaker.per_tool,
        }
    }

    // ── Shared state access ──

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    pub fn health(&self) -> Arc<HealthTracker> {
        Arc::clone(&self.health)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn memory(&self) -> MutexGuard<'_, WorkingMemory> {
        self.memory.lock().unwrap()
    }

    pub fn knowledge(&self) -> MutexGuard<'_, ProjectKnowledge> {
        self.knowledge.lock().unwrap()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task.lock().unwrap().clone()
    }

    /// Teach the coordinator which tools touch which targets, so
    /// `after_tool_execution` can maintain the relevance candidates.
    pub fn register_schemas(&self, schemas: &[ToolSchema]) {
        let mut kinds = self.schema_kinds.lock().unwrap();
        for schema in schemas {
            kinds.insert(schema.name.clone(), (schema.kind, schema.target_field.clone()));
        }
    }

    /// The top-K workspace targets most relevant to `request`, scored
    /// over everything the session has touched so far.
    pub fn relevant_candidates(&self, request: &str) -> Vec<ScoredItem> {
        let candidates: Vec<CandidateItem> =
            self.candidates.lock().unwrap().values().cloned().collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        self.selector.select(request, &candidates, Utc::now())
    }

    /// Drop knowledge facts whose anchors no longer resolve. Returns how
    /// many were removed.
    pub fn prune_knowledge<F: Fn(&str) -> bool>(&self, anchor_exists: F) -> usize {
        let removed = self.knowledge.lock().unwrap().prune_unanchored(anchor_exists);
        if removed > 0 {
            info!(removed, "Pruned knowledge facts with dead anchors");
        }
        removed
    }

    // ── Conversation scope ──

    /// Load persisted documents and reset session-scoped state.
    pub async fn on_conversation_start(&self) {
        match self.store.load_knowledge().await {
            Ok(knowledge) => {
                info!(facts = knowledge.facts.len(), "Project knowledge loaded");
                *self.knowledge.lock().unwrap() = knowledge;
            }
            Err(e) => warn!(error = %e, "Failed to load project knowledge, starting empty"),
        }
        match self.store.load_patterns().await {
            Ok(patterns) => {
                info!(patterns = patterns.len(), "Decision patterns loaded");
                *self.patterns.lock().unwrap() = patterns;
            }
            Err(e) => warn!(error = %e, "Failed to load decision patterns, starting empty"),
        }

        self.breaker.force_reset();
        self.health.clear();
        self.memory.lock().unwrap().clear_all();
        self.candidates.lock().unwrap().clear();
        *self.last_published_mode.lock().unwrap() = CircuitMode::Closed;
    }

    /// Save persisted documents and clear session-scoped state.
    pub async fn on_conversation_end(&self) {
        let knowledge = self.knowledge.lock().unwrap().clone();
        if let Err(e) = self.store.save_knowledge(&knowledge).await {
            warn!(error = %e, "Failed to save project knowledge");
        }
        let patterns = self.patterns.lock().unwrap().clone();
        if let Err(e) = self.store.save_patterns(&patterns).await {
            warn!(error = %e, "Failed to save decision patterns");
        }

        self.memory.lock().unwrap().clear_all();
        self.health.clear();
        self.candidates.lock().unwrap().clear();
        *self.current_task.lock().unwrap() = None;
    }

    /// Explicit mid-conversation checkpoint of the persisted documents.
    pub async fn checkpoint(&self) {
        let knowledge = self.knowledge.lock().unwrap().clone();
        let patterns = self.patterns.lock().unwrap().clone();
        if let Err(e) = self.store.save_knowledge(&knowledge).await {
            warn!(error = %e, "Checkpoint: knowledge save failed");
        }
        if let Err(e) = self.store.save_patterns(&patterns).await {
            warn!(error = %e, "Checkpoint: patterns save failed");
        }
    }

    // ── Task scope ──

    /// Reset task-scoped state and seed the critical tier with the goal.
    /// Returns the new task id.
    pub fn on_new_task(&self, message: &str) -> TaskId {
        let task_id = TaskId::new();

        {
            let mut memory = self.memory.lock().unwrap();
            memory.clear_task();
            memory.add_critical(MemoryItem::new("goal", message, "", 1.0));
        }
        self.tools_used.lock().unwrap().clear();
        *self.current_task.lock().unwrap() = Some(task_id.clone());

        self.events.publish(OrchestratorEvent::TaskStarted {
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
        });
        info!(task_id = %task_id, "Task started");
        task_id
    }

    /// Record the decision pattern for the finished task and clear the
    /// task scope.
    pub fn on_task_complete(&self, success: bool, summary: &str) {
        let tools = std::mem::take(&mut *self.tools_used.lock().unwrap());
        if !tools.is_empty() {
            self.patterns
                .lock()
                .unwrap()
                .push(DecisionPattern::new(summary, tools, success));
        }

        self.memory.lock().unwrap().clear_task();
        *self.current_task.lock().unwrap() = None;
        info!(success, "Task complete");
    }

    // ── Tool execution hooks ──

    /// Fan-out before a validated call executes: circuit gate plus guard
    /// warnings into working memory.
    pub fn before_tool_execution(&self, call: &ToolCall, validation: &Validation) -> ToolGate {
        let now = Utc::now();
        {
            let mut memory = self.memory.lock().unwrap();
            for warning in validation.warnings() {
                memory.add_working(
                    MemoryItem::new(
                        "guard_warning",
                        format!("{}: {}", call.name, warning.message),
                        "",
                        0.4,
                    ),
                    now,
                );
            }
        }

        let admitted = if self.per_tool_circuits {
            self.breaker.can_proceed_tool(&call.name)
        } else {
            self.breaker.can_proceed()
        };
        if !admitted {
            return ToolGate::CircuitOpen;
        }
        ToolGate::Proceed
    }

    /// Fan-out after execution: breaker accounting, memory recording,
    /// tool trace, events.
    pub fn after_tool_execution(&self, call: &ToolCall, report: &ExecutionReport) {
        let success = report.is_success();

        if self.per_tool_circuits {
            if success {
                self.breaker.record_success_tool(&call.name);
            } else {
                self.breaker.record_failure_tool(&call.name);
            }
        } else if success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }

        self.tools_used.lock().unwrap().push(call.name.clone());

        {
            let summary = match &report.result {
                Ok(outcome) => format!("{} → {}", call.name, outcome.render()),
                Err(e) => format!("{} → transport failure: {e}", call.name),
            };
            let mut memory = self.memory.lock().unwrap();
            memory.add_working(
                MemoryItem::new("tool_result", summary, "", if success { 0.6 } else { 0.8 }),
                Utc::now(),
            );
        }

        if success {
            self.note_target_activity(call);
        }

        self.events.publish(OrchestratorEvent::ToolExecuted {
            tool: call.name.clone(),
            success,
            attempts: report.attempts,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });

        self.publish_circuit_transition();
    }

    /// Keep the relevance candidates in step with what the agent touched:
    /// reads mark a target inspected, writes mark it changed-since-
    /// inspection (the agent has not seen the resulting state).
    fn note_target_activity(&self, call: &ToolCall) {
        let Some((kind, Some(field))) = self
            .schema_kinds
            .lock()
            .unwrap()
            .get(&call.name)
            .cloned()
        else {
            return;
        };
        let Some(target) = call.arguments.get(&field).and_then(|v| v.as_str()) else {
            return;
        };

        let now = Utc::now();
        let mut candidates = self.candidates.lock().unwrap();

        if kind == OperationKind::Delete {
            candidates.remove(target);
            return;
        }

        let item = candidates
            .entry(target.to_string())
            .or_insert_with(|| CandidateItem {
                id: target.to_string(),
                keywords: path_keywords(target),
                capabilities: Vec::new(),
                modified_at: now,
                last_inspected_at: None,
                changed_since_inspection: false,
            });

        match kind {
            OperationKind::Read => {
                item.last_inspected_at = Some(now);
                item.changed_since_inspection = false;
            }
            OperationKind::Create | OperationKind::Modify => {
                item.modified_at = now;
                item.changed_since_inspection = true;
            }
            OperationKind::Delete | OperationKind::Query => {}
        }
    }

    fn publish_circuit_transition(&self) {
        let mode = self.breaker.mode();
        let mut last = self.last_published_mode.lock().unwrap();
        if *last != mode {
            self.events.publish(OrchestratorEvent::CircuitStateChanged {
                from: last.to_string(),
                to: mode.to_string(),
                consecutive_failures: self.breaker.snapshot().consecutive_failures,
                timestamp: Utc::now(),
            });
            *last = mode;
        }
    }
}

/// Keywords from a path: separator-split segments, lowercased.
fn path_keywords(path: &str) -> Vec<String> {
    path.split(|c: char| matches!(c, '/' | '.' | '_' | '-'))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}
