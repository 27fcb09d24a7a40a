//! `tauti config`: configuration management commands.

use std::path::Path;
use tauti_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path().display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if write_starter(&path)? {
        println!("Wrote {}", path.display());
    } else {
        eprintln!("  {} already exists; leaving it unchanged.", path.display());
    }
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Write the starter file unless one exists. Returns whether it wrote.
fn write_starter(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for model in &mut config.models {
        if model.api_key.is_some() {
            model.api_key = Some(REDACTED.into());
        }
    }
    config
}
