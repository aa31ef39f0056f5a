//! `tiller status` — show configuration and persisted knowledge.

use anyhow::Context;
use tiller_config::AppConfig;
use tiller_core::store::KnowledgeStore;
use tiller_session::FileStore;

pub async fn execute() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    println!("Tiller status");
    println!("  model:            {}", config.model);
    println!("  base URL:         {}", config.base_url);
    println!("  api key:          {}", if config.api_key.is_some() { "configured" } else { "missing" });
    println!("  max iterations:   {}", config.engine.max_iterations);
    println!(
        "  breaker:          threshold {}, cooldown {}s{}",
        config.breaker.failure_threshold,
        config.breaker.cooldown_secs,
        if config.breaker.per_tool { ", per-tool" } else { "" }
    );
    println!(
        "  context:          budget {} tokens, preserve {} turns",
        config.context.token_budget, config.context.preserve_count
    );

    let store_dir = config.store.resolved_dir();
    println!("  store:            {}", store_dir.display());

    let store = FileStore::new(store_dir);
    match store.load_knowledge().await {
        Ok(knowledge) => println!("  knowledge facts:  {}", knowledge.facts.len()),
        Err(e) => println!("  knowledge facts:  unreadable ({e})"),
    }
    match store.load_patterns().await {
        Ok(patterns) => {
            let successful = patterns.iter().filter(|p| p.success).count();
            println!("  decision patterns: {} ({successful} successful)", patterns.len());
        }
        Err(e) => println!("  decision patterns: unreadable ({e})"),
    }

    Ok(())
}
