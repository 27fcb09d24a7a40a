//! `tauti models`: list the models a backend offers.

use tauti_config::AppConfig;
use tauti_providers::ProviderRouter;

pub async fn run(model: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let model = model.unwrap_or_else(|| config.model.clone());
    let endpoint = config.resolve(&model);
    let router = ProviderRouter::new();

    if let Some(manager) = router.availability(&endpoint, &config) {
        manager.ensure_available().await?;
    }

    let models = router.provider(&endpoint).list_models().await?;
    if models.is_empty() {
        eprintln!("  No models available at {}", endpoint.base_url);
        return Ok(());
    }

    eprintln!("  Models at {} ({}):", endpoint.base_url, endpoint.provider);
    for name in &models {
        let marker = if is_selected(name, &model) { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

fn is_selected(listed: &str, model: &str) -> bool {
    listed == model || listed.strip_suffix(":latest") == Some(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_configured_model() {
        assert!(is_selected("llama3:latest", "llama3"));
        assert!(is_selected("gpt-4o", "gpt-4o"));
        assert!(!is_selected("gpt-4o-mini", "gpt-4o"));
    }
}
