//! The loop controller implementation.

use crate::outcome::{ApprovalRequest, FeedbackRequest, IterationOutcome};
use crate::paused::{PauseReason, PausedState, ResumeDecision};
use crate::repeat::{REPEAT_GUIDANCE, RepeatTracker};
use chrono::Utc;
use std::sync::Arc;
use tiller_config::AppConfig;
use tiller_context::compress::Compressor;
use tiller_core::backend::{OperationKind, TargetIndex, ToolBackend, ToolOutcome, ToolSchema};
use tiller_core::error::EngineError;
use tiller_core::event::OrchestratorEvent;
use tiller_core::provider::{ModelProvider, ModelRequest};
use tiller_core::turn::{ToolCall, ToolRecord, Turn};
use tiller_guard::Validator;
use tiller_resilience::executor::ResilientExecutor;
use tiller_session::{SessionCoordinator, ToolGate};
use tracing::{debug, error, info, warn};

/// The built-in tool the model uses to ask the human a question. Handled
/// by the controller itself; never forwarded to the backend.
pub const FEEDBACK_TOOL: &str = "request_feedback";

const BASE_SYSTEM_PROMPT: &str = "You are an autonomous engineering agent operating on a \
workspace through tools. Inspect before you mutate, make one change at a time, and finish \
with a plain-text summary of what you did. Dangerous operations are deferred for human \
approval; use request_feedback when you need the human to decide something.";

/// One private step of the loop.
enum Step {
    Continue,
    Yield(IterationOutcome),
}

/// The top-level state machine driving the agent.
pub struct LoopController {
    provider: Arc<dyn ModelProvider>,
    backend: Arc<dyn ToolBackend>,
    target_index: Arc<dyn TargetIndex>,
    executor: ResilientExecutor,
    validator: Validator,
    compressor: Compressor,
    coordinator: Arc<SessionCoordinator>,
    config: AppConfig,
    history: Vec<Turn>,
    iterations: u32,
    paused: Option<PausedState>,
    repeat: RepeatTracker,
}

impl LoopController {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        backend: Arc<dyn ToolBackend>,
        target_index: Arc<dyn TargetIndex>,
        coordinator: Arc<SessionCoordinator>,
        config: AppConfig,
    ) -> Self {
        let executor = ResilientExecutor::new(
            Arc::clone(&backend),
            coordinator.health(),
            config.retry.clone(),
        );

        let mut schemas = backend.schemas();
        coordinator.register_schemas(&schemas);
        schemas.push(feedback_schema());
        let validator = Validator::new(schemas);

        let compressor = Compressor::new(
            config.context.token_budget,
            config.context.preserve_count,
            config.model.clone(),
        );
        let repeat = RepeatTracker::new(config.engine.repeat_threshold);

        Self {
            provider,
            backend,
            target_index,
            executor,
            validator,
            compressor,
            coordinator,
            config,
            history: Vec::new(),
            iterations: 0,
            paused: None,
            repeat,
        }
    }

    /// The session coordinator behind this controller.
    pub fn coordinator(&self) -> Arc<SessionCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// The conversation history so far.
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// The current suspension, if any.
    pub fn paused(&self) -> Option<&PausedState> {
        self.paused.as_ref()
    }

    // ── Task driving ──

    /// Run one task to a terminal or suspended outcome.
    pub async fn run_task(&mut self, message: &str) -> IterationOutcome {
        self.abandon_paused();
        self.coordinator.on_new_task(message);

        // Facts anchored to vanished targets are stale; drop them now.
        let index = Arc::clone(&self.target_index);
        self.coordinator.prune_knowledge(|anchor| index.contains(anchor));

        self.history.push(Turn::user(message));
        self.iterations = 0;
        self.repeat.clear();
        self.run_loop().await
    }

    /// Resume a suspended loop with the human's decision.
    ///
    /// Fails with `StaleOperation` if the active task no longer matches
    /// the suspension — the underlying operation is never executed in
    /// that case.
    pub async fn resume(&mut self, decision: ResumeDecision) -> Result<IterationOutcome, EngineError> {
        let paused = self.paused.take().ok_or(EngineError::NothingToResume)?;

        let active = self.coordinator.current_task();
        if active.as_ref() != Some(&paused.task_id) {
            return Err(EngineError::StaleOperation {
                paused_task: paused.task_id.to_string(),
                active_task: active
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "none".into()),
            });
        }

        // Kind and operation-id checks keep the suspension alive on a
        // mismatched decision — the UI can try again.
        match (&paused.reason, &decision) {
            (PauseReason::Approval(req), ResumeDecision::Approval { operation_id, .. }) => {
                if operation_id != &req.operation_id {
                    self.paused = Some(paused);
                    return Err(EngineError::ResumeMismatch {
                        expected: "matching operation id".into(),
                    });
                }
            }
            (PauseReason::Approval(_), ResumeDecision::Feedback { .. }) => {
                self.paused = Some(paused);
                return Err(EngineError::ResumeMismatch {
                    expected: "approval decision".into(),
                });
            }
            (PauseReason::Feedback(_), ResumeDecision::Approval { .. }) => {
                self.paused = Some(paused);
                return Err(EngineError::ResumeMismatch {
                    expected: "feedback answer".into(),
                });
            }
            (PauseReason::Feedback(_), ResumeDecision::Feedback { .. }) => {}
        }

        let PausedState {
            task_id,
            batch,
            resume_index,
            mut collected,
            reason,
        } = paused;

        // Patch the most recently queued record with the human's outcome.
        let (patched, approved) = match (&reason, &decision) {
            (PauseReason::Approval(_), ResumeDecision::Approval { operation_id, approved }) => {
                let outcome = match self.backend.resolve_pending(operation_id, *approved).await {
                    Ok(outcome) => outcome.sanitized(self.config.engine.max_result_chars),
                    Err(e) => {
                        warn!(operation_id = %operation_id, error = %e, "Pending resolution failed");
                        ToolOutcome::error(format!("approval resolution failed: {e}"))
                    }
                };
                (outcome, *approved)
            }
            (PauseReason::Feedback(_), ResumeDecision::Feedback { answer }) => (
                ToolOutcome::ok_with("feedback", serde_json::json!(answer)),
                true,
            ),
            // Mismatches returned above
            _ => unreachable!("resume kind checked before destructuring"),
        };

        if let Some(last) = collected.last_mut() {
            last.outcome = patched;
        }

        self.coordinator.events().publish(OrchestratorEvent::LoopResumed {
            task_id: task_id.to_string(),
            approved,
            timestamp: Utc::now(),
        });
        info!(task_id = %task_id, approved, "Loop resumed");

        match self.process_batch(batch, resume_index, collected).await {
            Step::Continue => Ok(self.run_loop().await),
            Step::Yield(outcome) => Ok(outcome),
        }
    }

    // ── The loop ──

    async fn run_loop(&mut self) -> IterationOutcome {
        loop {
            match self.run_iteration().await {
                Step::Continue => continue,
                Step::Yield(outcome) => return outcome,
            }
        }
    }

    async fn run_iteration(&mut self) -> Step {
        self.iterations += 1;
        if self.iterations > self.config.engine.max_iterations {
            let iterations = self.iterations - 1;
            error!(iterations, "Iteration cap exceeded, stopping task");
            self.finish_task(false, "iteration cap exceeded");
            return Step::Yield(IterationOutcome::Fatal(EngineError::IterationCapExceeded {
                iterations,
            }));
        }

        debug!(iteration = self.iterations, "Loop iteration");

        // (a) Keep history inside the token budget.
        if let Some(report) = self
            .compressor
            .compress_if_needed(&mut self.history, self.provider.as_ref())
            .await
        {
            self.coordinator
                .events()
                .publish(OrchestratorEvent::HistoryCompressed {
                    strategy: report.strategy.to_string(),
                    turns_before: report.turns_before,
                    turns_after: report.turns_after,
                    timestamp: Utc::now(),
                });
        }

        // (b) Ask the model what to do next.
        let request = ModelRequest {
            model: self.config.model.clone(),
            system_prompt: self.build_system_prompt(),
            turns: self.history.clone(),
            tools: self.tool_schemas(),
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
        };

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Provider failure ended the task");
                self.finish_task(false, "provider failure");
                return Step::Yield(IterationOutcome::Fatal(EngineError::FatalProvider(e)));
            }
        };

        self.coordinator
            .events()
            .publish(OrchestratorEvent::ModelResponded {
                model: response.model.clone(),
                tool_call_count: response.tool_calls.len(),
                tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
                timestamp: Utc::now(),
            });

        // (c) Fold the response into history.
        let tool_calls = response.tool_calls.clone();
        self.history
            .push(Turn::agent(response.text.clone(), tool_calls.clone()));

        // (d) Text only → the task is complete.
        if tool_calls.is_empty() {
            self.finish_task(true, &response.text);
            return Step::Yield(IterationOutcome::Done(response.text));
        }

        // (e) Execute the batch strictly sequentially.
        self.process_batch(tool_calls, 0, Vec::new()).await
    }

    /// Process batch items from `start` onward. Later calls may depend on
    /// earlier side effects, so ordering is load-bearing here.
    async fn process_batch(
        &mut self,
        batch: Vec<ToolCall>,
        start: usize,
        mut collected: Vec<ToolRecord>,
    ) -> Step {
        let max_chars = self.config.engine.max_result_chars;
        let mut index = start;

        while index < batch.len() {
            let call = batch[index].clone();
            index += 1;

            // The feedback tool suspends instead of executing.
            if call.name == FEEDBACK_TOOL {
                let request = feedback_request_from(&call);
                collected.push(ToolRecord::new(
                    &call,
                    ToolOutcome::Pending {
                        operation_id: FEEDBACK_TOOL.into(),
                    },
                ));
                return Step::Yield(self.suspend(
                    batch,
                    index,
                    collected,
                    PauseReason::Feedback(request),
                ));
            }

            // A repeat spiral gets guidance instead of another execution.
            if self.repeat.record(&call) {
                warn!(tool = %call.name, "Repeated identical call, injecting guidance");
                collected.push(ToolRecord::new(&call, ToolOutcome::error(REPEAT_GUIDANCE)));
                continue;
            }

            // Pre-flight validation: invalid calls never reach the backend.
            let validation = self.validator.validate(&call, self.target_index.as_ref());
            if !validation.is_valid() {
                self.coordinator
                    .events()
                    .publish(OrchestratorEvent::ToolRejected {
                        tool: call.name.clone(),
                        issue_count: validation.findings.len(),
                        timestamp: Utc::now(),
                    });
                collected.push(ToolRecord::new(&call, ToolOutcome::error(validation.render())));
                continue;
            }

            // Circuit gate: a hard safety boundary, surfaced, never absorbed.
            if self.coordinator.before_tool_execution(&call, &validation) == ToolGate::CircuitOpen {
                collected.push(ToolRecord::new(
                    &call,
                    ToolOutcome::error_with_hint(
                        "circuit breaker is open: repeated tool failures suspended execution",
                        "wait for the cooldown or ask the user to reset the circuit",
                    ),
                ));
                continue;
            }

            // Execute through retry/backoff/health.
            let report = self.executor.execute(&call).await;
            self.coordinator.after_tool_execution(&call, &report);

            match report.result {
                Ok(ToolOutcome::Pending { operation_id }) => {
                    let approval = self.approval_request(&operation_id, &call).await;
                    collected.push(ToolRecord::new(
                        &call,
                        ToolOutcome::Pending {
                            operation_id: operation_id.clone(),
                        },
                    ));
                    return Step::Yield(self.suspend(
                        batch,
                        index,
                        collected,
                        PauseReason::Approval(approval),
                    ));
                }
                Ok(outcome) => {
                    collected.push(ToolRecord::new(&call, outcome.sanitized(max_chars)));
                }
                Err(e) => {
                    collected.push(ToolRecord::new(
                        &call,
                        ToolOutcome::error(format!(
                            "tool backend failure after {} attempts: {e}",
                            report.attempts
                        )),
                    ));
                }
            }
        }

        // Every call answered: fold the records and advance.
        for record in collected {
            self.history.push(Turn::tool(record));
        }
        Step::Continue
    }

    // ── Suspension ──

    fn suspend(
        &mut self,
        batch: Vec<ToolCall>,
        resume_index: usize,
        collected: Vec<ToolRecord>,
        reason: PauseReason,
    ) -> IterationOutcome {
        let task_id = self.coordinator.current_task().unwrap_or_default();
        let label = match &reason {
            PauseReason::Approval(_) => "approval",
            PauseReason::Feedback(_) => "feedback",
        };

        self.coordinator
            .events()
            .publish(OrchestratorEvent::LoopSuspended {
                task_id: task_id.to_string(),
                reason: label.to_string(),
                timestamp: Utc::now(),
            });
        info!(task_id = %task_id, reason = label, "Loop suspended");

        let outcome = match &reason {
            PauseReason::Approval(req) => IterationOutcome::AwaitingApproval(req.clone()),
            PauseReason::Feedback(req) => IterationOutcome::AwaitingFeedback(req.clone()),
        };

        self.paused = Some(PausedState {
            task_id,
            batch,
            resume_index,
            collected,
            reason,
        });
        outcome
    }

    /// Fold an abandoned suspension into history so the turn invariant
    /// holds when a new task supersedes a suspended one.
    fn abandon_paused(&mut self) {
        let Some(paused) = self.paused.take() else {
            return;
        };
        warn!(task_id = %paused.task_id, "Suspended batch abandoned by a new task");

        for record in paused.collected {
            self.history.push(Turn::tool(record));
        }
        for call in &paused.batch[paused.resume_index..] {
            self.history.push(Turn::tool(ToolRecord::new(
                call,
                ToolOutcome::error("not executed: task superseded"),
            )));
        }
    }

    async fn approval_request(&self, operation_id: &str, call: &ToolCall) -> ApprovalRequest {
        let description = self
            .backend
            .pending_operations()
            .await
            .into_iter()
            .find(|op| op.id == operation_id)
            .map(|op| format!("{} with {}", op.tool, op.payload))
            .unwrap_or_else(|| format!("{} with {}", call.name, call.arguments));

        ApprovalRequest {
            operation_id: operation_id.to_string(),
            tool: call.name.clone(),
            description,
            payload: call.arguments.clone(),
        }
    }

    // ── Prompt assembly ──

    fn build_system_prompt(&self) -> String {
        let mut prompt = BASE_SYSTEM_PROMPT.to_string();

        let facts = {
            let knowledge = self.coordinator.knowledge();
            knowledge
                .facts
                .iter()
                .take(10)
                .map(|f| format!("- {} (anchor: {})", f.statement, f.anchor))
                .collect::<Vec<_>>()
        };
        if !facts.is_empty() {
            prompt.push_str("\n\n## Project Knowledge\n");
            prompt.push_str(&facts.join("\n"));
        }

        // Targets the session has touched, ranked against the request.
        let request = self
            .history
            .iter()
            .rev()
            .find(|t| t.is_user())
            .map(|t| t.content())
            .unwrap_or_default();
        let relevant = self.coordinator.relevant_candidates(&request);
        if !relevant.is_empty() {
            prompt.push_str("\n\n## Workspace Focus\n");
            for item in relevant {
                prompt.push_str(&format!("- {} ({})\n", item.id, item.reason));
            }
        }

        let memory = self.coordinator.memory().render(Utc::now(), 12);
        if !memory.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&memory);
        }

        prompt
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = self.backend.schemas();
        schemas.push(feedback_schema());
        schemas
    }

    fn finish_task(&mut self, success: bool, summary: &str) {
        if let Some(task_id) = self.coordinator.current_task() {
            self.coordinator
                .events()
                .publish(OrchestratorEvent::TaskCompleted {
                    task_id: task_id.to_string(),
                    success,
                    iterations: self.iterations,
                    timestamp: Utc::now(),
                });
        }
        let summary: String = summary.chars().take(200).collect();
        self.coordinator.on_task_complete(success, &summary);
    }
}

/// Schema for the controller-owned feedback tool.
fn feedback_schema() -> ToolSchema {
    ToolSchema {
        name: FEEDBACK_TOOL.into(),
        description: "Ask the human a verification question and wait for the answer".into(),
        kind: OperationKind::Query,
        required: vec!["question".into()],
        target_field: None,
        content_fields: vec![],
        dangerous: false,
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "The question for the human" },
                "context": { "type": "string", "description": "Supporting context" },
                "verification_type": { "type": "string", "description": "confirm | choose | clarify" },
                "suggestions": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["question"]
        }),
    }
}

fn feedback_request_from(call: &ToolCall) -> FeedbackRequest {
    let str_arg = |key: &str| {
        call.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    let suggestions = call
        .arguments
        .get("suggestions")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let question = {
        let q = str_arg("question");
        if q.is_empty() {
            "The agent requested feedback.".into()
        } else {
            q
        }
    };

    FeedbackRequest {
        question,
        context: str_arg("context"),
        verification_type: str_arg("verification_type"),
        suggestions,
    }
}
