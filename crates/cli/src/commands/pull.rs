//! `tauti pull`: download a model into the local Ollama daemon.

use std::io::Write;
use tauti_config::AppConfig;
use tauti_providers::{OllamaProvider, ProviderRouter, PullProgress};

pub async fn run(model: String) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let endpoint = config.resolve(&model);
    let router = ProviderRouter::new();

    let Some(manager) = router.availability(&endpoint, &config) else {
        return Err(format!(
            "'{model}' resolves to a {} endpoint; only Ollama models can be pulled",
            endpoint.provider
        )
        .into());
    };
    manager.ensure_available().await?;

    let mut progress = OllamaProvider::new(&endpoint.base_url).pull_model(&model).await?;
    let mut finished = false;

    while let Some(update) = progress.recv().await {
        let update = update?;
        eprint!("\r  {:<60}", progress_line(&update));
        std::io::stderr().flush()?;
        finished = update.is_success();
    }
    eprintln!();

    if !finished {
        return Err(format!("Pull of '{model}' ended without a success status").into());
    }
    println!("{model}");
    Ok(())
}

fn progress_line(update: &PullProgress) -> String {
    match update.percent {
        Some(percent) => format!("{} {percent:>3}%", update.status),
        None => update.status.clone(),
    }
}
