//! Tauti CLI: the main entry point.
//!
//! Commands:
//! - `chat`: One message or an interactive session, optionally with tools
//! - `models`: List the models a backend offers
//! - `pull`: Download a model into a local Ollama daemon
//! - `config`: Show, locate, or initialize the configuration file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tauti",
    about = "Tauti: chat with local and hosted LLMs",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with a model
    Chat(commands::chat::ChatArgs),

    /// List available models
    Models {
        /// Model whose endpoint to query (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Download a model into the local Ollama daemon
    Pull {
        /// Model to download, e.g. `qwen3:0.6b`
        model: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the configuration file path
    Path,
    /// Write a starter configuration file if none exists
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only model output.
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat(args) => commands::chat::run(args).await?,
        Commands::Models { model } => commands::models::run(model).await?,
        Commands::Pull { model } => commands::pull::run(model).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_flags() {
        let cli = Cli::try_parse_from(["tauti", "chat", "-m", "qwen3:0.6b", "--tools", "--no-think", "hello"])
            .unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.model.as_deref(), Some("qwen3:0.6b"));
                assert!(args.tools);
                assert_eq!(args.think(), Some(false));
                assert_eq!(args.message.as_deref(), Some("hello"));
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn think_flags_conflict() {
        assert!(Cli::try_parse_from(["tauti", "chat", "--think", "--no-think"]).is_err());
    }

    #[test]
    fn parses_pull_and_config() {
        let cli = Cli::try_parse_from(["tauti", "-v", "pull", "llama3"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Pull { model } if model == "llama3"));

        let cli = Cli::try_parse_from(["tauti", "config", "init"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init
            }
        ));
    }
}
