//! `tiller run` — drive one task through the loop, handling approval and
//! feedback suspensions interactively.

use anyhow::Context;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tiller_config::AppConfig;
use tiller_core::backend::{TargetIndex, ToolBackend};
use tiller_core::provider::{ModelProvider, ModelResponse};
use tiller_core::turn::ToolCall;
use tiller_engine::{IterationOutcome, LoopController, ResumeDecision};
use tiller_provider::{OpenAiCompatProvider, RetryingProvider, ScriptedProvider};
use tiller_session::{FileStore, SessionCoordinator};
use tiller_workspace::MemoryWorkspace;
use tracing::info;

pub async fn execute(message: &str, offline: bool) -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    let provider: Arc<dyn ModelProvider> = if offline {
        demo_provider()
    } else {
        let api_key = config
            .api_key
            .clone()
            .context("no API key configured (set TILLER_API_KEY)")?;
        let http = OpenAiCompatProvider::new("openai-compat", config.base_url.clone(), api_key)
            .context("failed to build provider")?;
        Arc::new(RetryingProvider::new(Arc::new(http)))
    };

    let workspace = Arc::new(
        MemoryWorkspace::new(config.approval.pending_ttl_secs).seed(&[
            ("src/main.rs", "fn main() {\n    app::run();\n}\n"),
            ("src/app.rs", "pub fn run() {\n    println!(\"hello\");\n}\n"),
            ("README.md", "# Demo workspace\n"),
        ]),
    );

    let store = Arc::new(FileStore::new(config.store.resolved_dir()));
    let coordinator = Arc::new(SessionCoordinator::new(&config, store));

    let mut controller = LoopController::new(
        provider,
        workspace.clone() as Arc<dyn ToolBackend>,
        workspace as Arc<dyn TargetIndex>,
        coordinator.clone(),
        config,
    );

    coordinator.on_conversation_start().await;
    info!("Conversation started");

    let mut outcome = controller.run_task(message).await;
    loop {
        match outcome {
            IterationOutcome::Done(text) => {
                println!("\n{text}");
                break;
            }
            IterationOutcome::Fatal(e) => {
                eprintln!("\nTask failed: {e}");
                break;
            }
            IterationOutcome::AwaitingApproval(request) => {
                println!("\nApproval required: {}", request.description);
                let approved = prompt_yes_no("Approve? [y/N] ")?;
                outcome = controller
                    .resume(ResumeDecision::Approval {
                        operation_id: request.operation_id,
                        approved,
                    })
                    .await
                    .context("resume failed")?;
            }
            IterationOutcome::AwaitingFeedback(request) => {
                println!("\nThe agent asks: {}", request.question);
                if !request.suggestions.is_empty() {
                    println!("Suggestions: {}", request.suggestions.join(", "));
                }
                let answer = prompt_line("> ")?;
                outcome = controller
                    .resume(ResumeDecision::Feedback { answer })
                    .await
                    .context("resume failed")?;
            }
        }
    }

    coordinator.on_conversation_end().await;

    let health = coordinator.health().snapshot();
    if !health.is_empty() {
        println!("\nTool health:");
        for entry in health {
            println!(
                "  {:<16} {:>3}% ({}/{})",
                entry.tool,
                (entry.success_rate * 100.0).round() as u32,
                entry.successes,
                entry.samples
            );
        }
    }

    Ok(())
}

/// Canned responses that exercise the whole loop without network access.
fn demo_provider() -> Arc<dyn ModelProvider> {
    Arc::new(ScriptedProvider::new(vec![
        ModelResponse {
            text: String::new(),
            tool_calls: vec![
                ToolCall::new("list_entries", json!({})),
                ToolCall::new("read_entry", json!({"path": "README.md"})),
            ],
            usage: None,
            model: "demo".into(),
        },
        ModelResponse::text_only(
            "Demo run complete: listed the workspace and read the README.",
        ),
    ]))
}

fn prompt_yes_no(prompt: &str) -> anyhow::Result<bool> {
    let answer = prompt_line(prompt)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}
