//! End-to-end loop scenarios: scripted provider + reference backend.

use serde_json::json;
use std::sync::Arc;
use tiller_config::AppConfig;
use tiller_core::backend::{TargetIndex, ToolBackend};
use tiller_core::event::OrchestratorEvent;
use tiller_core::provider::{ModelProvider, ModelResponse};
use tiller_core::store::{KnowledgeFact, KnowledgeStore};
use tiller_core::turn::{ToolCall, history_is_balanced};
use tiller_engine::{IterationOutcome, LoopController};
use tiller_provider::ScriptedProvider;
use tiller_session::{InMemoryStore, SessionCoordinator};
use tiller_workspace::MemoryWorkspace;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.backoff_ms = vec![1, 1, 1];
    config.retry.tool_timeout_secs = 5;
    config
}

fn workspace() -> Arc<MemoryWorkspace> {
    Arc::new(MemoryWorkspace::new(600).seed(&[
        ("src/main.rs", "fn main() {\n    app::run();\n}\n"),
        ("src/app.rs", "pub fn run() {\n    println!(\"hello\");\n}\n"),
        ("README.md", "# Demo workspace\n"),
    ]))
}

fn controller(
    provider: Arc<dyn ModelProvider>,
    ws: Arc<MemoryWorkspace>,
    store: Arc<dyn KnowledgeStore>,
    config: AppConfig,
) -> LoopController {
    let coordinator = Arc::new(SessionCoordinator::new(&config, store));
    LoopController::new(
        provider,
        ws.clone() as Arc<dyn ToolBackend>,
        ws as Arc<dyn TargetIndex>,
        coordinator,
        config,
    )
}

fn tool_response(calls: Vec<ToolCall>) -> ModelResponse {
    ModelResponse {
        text: String::new(),
        tool_calls: calls,
        usage: None,
        model: "scripted".into(),
    }
}

#[tokio::test]
async fn read_then_patch_workflow() {
    let ws = workspace();
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![ToolCall::new("read_entry", json!({"path": "src/app.rs"}))]),
        tool_response(vec![ToolCall::new(
            "patch_entry",
            json!({
                "path": "src/app.rs",
                "search": "println!(\"hello\")",
                "replace": "println!(\"hello, world\")"
            }),
        )]),
        ModelResponse::text_only("Updated the greeting in src/app.rs."),
    ]));

    let mut ctl = controller(
        provider,
        ws.clone(),
        Arc::new(InMemoryStore::new()),
        test_config(),
    );
    ctl.coordinator().on_conversation_start().await;

    let outcome = ctl.run_task("change the greeting to 'hello, world'").await;
    match outcome {
        IterationOutcome::Done(text) => assert!(text.contains("Updated")),
        other => panic!("Expected Done, got {other:?}"),
    }

    // The workspace actually changed
    assert!(
        ws.content_of("src/app.rs")
            .unwrap()
            .contains("hello, world")
    );
    assert!(history_is_balanced(ctl.history()));

    // Health has perfect rates for both tools
    let health = ctl.coordinator().health().snapshot();
    assert!(health.iter().all(|h| (h.success_rate - 1.0).abs() < f64::EPSILON));
}

#[tokio::test]
async fn long_history_is_compressed_with_model_summary() {
    let ws = workspace();
    let mut config = test_config();
    config.context.token_budget = 200;
    config.context.preserve_count = 2;

    // Response order: iteration-1 completion, then the summarizer call,
    // then the iteration-2 completion.
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![ToolCall::new("read_entry", json!({"path": "src/main.rs"}))]),
        ModelResponse::text_only(
            "Summary: the user asked for an audit; the agent read src/main.rs and found \
             the entry point delegating to app::run.",
        ),
        ModelResponse::text_only("Audit complete."),
    ]));

    let mut ctl = controller(
        provider.clone(),
        ws,
        Arc::new(InMemoryStore::new()),
        config,
    );
    ctl.coordinator().on_conversation_start().await;
    let mut events = ctl.coordinator().events().subscribe();

    let padding = "audit the workspace and report everything you can find about it ".repeat(20);
    let outcome = ctl.run_task(&padding).await;
    assert!(matches!(outcome, IterationOutcome::Done(_)));

    // A compression event fired with the model-summary strategy
    let mut compressed = None;
    while let Ok(event) = events.try_recv() {
        if let OrchestratorEvent::HistoryCompressed { strategy, .. } = event.as_ref() {
            compressed = Some(strategy.clone());
        }
    }
    assert_eq!(compressed.as_deref(), Some("model_summary"));

    // The oldest turns were replaced by the summary marker
    assert!(ctl.history()[0].content().contains("[Conversation summary"));
}

#[tokio::test]
async fn knowledge_persists_across_conversations_and_reaches_the_prompt() {
    let store: Arc<dyn KnowledgeStore> = Arc::new(InMemoryStore::new());

    // First conversation: learn a fact, then end (which saves).
    {
        let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::text_only("ok")]));
        let ctl = controller(provider, workspace(), store.clone(), test_config());
        let coordinator = ctl.coordinator();
        coordinator.on_conversation_start().await;
        coordinator
            .knowledge()
            .facts
            .push(KnowledgeFact::new("entry point delegates to app::run", "src/main.rs"));
        coordinator.on_conversation_end().await;
    }

    // Second conversation: the fact is loaded and injected into the prompt.
    let provider = Arc::new(ScriptedProvider::new(vec![ModelResponse::text_only("hi")]));
    let mut ctl = controller(provider.clone(), workspace(), store, test_config());
    ctl.coordinator().on_conversation_start().await;
    ctl.run_task("what do you know about this project?").await;

    let first_request = &provider.requests()[0];
    assert!(
        first_request.system_prompt.contains("app::run"),
        "knowledge fact missing from system prompt"
    );
}

#[tokio::test]
async fn touched_targets_surface_in_followup_prompt() {
    let ws = workspace();
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![ToolCall::new("read_entry", json!({"path": "src/app.rs"}))]),
        ModelResponse::text_only("Read the app module."),
        ModelResponse::text_only("Improved it."),
    ]));
    let mut ctl = controller(
        provider.clone(),
        ws,
        Arc::new(InMemoryStore::new()),
        test_config(),
    );
    ctl.coordinator().on_conversation_start().await;

    ctl.run_task("look at the app module").await;
    ctl.run_task("now improve the app").await;

    let requests = provider.requests();
    let last = requests.last().unwrap();
    assert!(last.system_prompt.contains("Workspace Focus"));
    assert!(last.system_prompt.contains("src/app.rs"));
}

#[tokio::test]
async fn decision_pattern_recorded_for_successful_task() {
    let ws = workspace();
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_response(vec![ToolCall::new("list_entries", json!({}))]),
        ModelResponse::text_only("Three entries present."),
    ]));

    let mut ctl = controller(provider, ws, store.clone(), test_config());
    let coordinator = ctl.coordinator();
    coordinator.on_conversation_start().await;

    ctl.run_task("how many entries are there?").await;
    coordinator.on_conversation_end().await;

    let patterns = store.load_patterns().await.unwrap();
    assert_eq!(patterns.len(), 1);
    assert!(patterns[0].success);
    assert_eq!(patterns[0].tool_sequence, vec!["list_entries".to_string()]);
}
