//! `tiller doctor` — diagnose configuration and provider reachability.

use std::sync::Arc;
use tiller_config::AppConfig;
use tiller_core::provider::ModelProvider;
use tiller_provider::OpenAiCompatProvider;

pub async fn execute() -> anyhow::Result<()> {
    println!("Tiller doctor\n");

    // Configuration
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("✓ configuration valid");
            config
        }
        Err(e) => {
            println!("✗ configuration: {e}");
            return Ok(());
        }
    };

    // Credentials
    let Some(api_key) = config.api_key.clone() else {
        println!("✗ no API key (set TILLER_API_KEY or add api_key to config.toml)");
        println!("  offline runs still work: tiller run --offline -m \"...\"");
        return Ok(());
    };
    println!("✓ API key configured");

    // Provider reachability
    match OpenAiCompatProvider::new("doctor", config.base_url.clone(), api_key) {
        Ok(provider) => {
            let provider = Arc::new(provider);
            match provider.health_check().await {
                Ok(true) => println!("✓ provider reachable at {}", config.base_url),
                Ok(false) => println!("✗ provider responded with an error at {}", config.base_url),
                Err(e) => println!("✗ provider unreachable: {e}"),
            }
        }
        Err(e) => println!("✗ provider construction failed: {e}"),
    }

    // Store directory writability
    let dir = config.store.resolved_dir();
    match std::fs::create_dir_all(&dir) {
        Ok(()) => println!("✓ store directory writable: {}", dir.display()),
        Err(e) => println!("✗ store directory: {e}"),
    }

    Ok(())
}
