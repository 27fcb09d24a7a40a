//! `tauti chat`: single-message or interactive chat.

use clap::Args;
use std::io::Write;
use tauti_agent::{TurnEvent, TurnOptions, TurnOutcome, TurnRunner};
use tauti_config::AppConfig;
use tauti_core::error::{Error, ProviderError};
use tauti_core::message::Message;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Send a single message instead of entering interactive mode
    pub message: Option<String>,

    /// Model to use (defaults to the configured model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Ask the model to reason before answering
    #[arg(long, conflicts_with = "no_think")]
    pub think: bool,

    /// Ask the model to answer without reasoning
    #[arg(long)]
    pub no_think: bool,

    /// Let the model call the configured tool servers
    #[arg(short, long)]
    pub tools: bool,

    /// Print turn events as newline-delimited JSON
    #[arg(long)]
    pub json: bool,
}

impl ChatArgs {
    /// `None` leaves the choice to `default_think`.
    pub fn think(&self) -> Option<bool> {
        match (self.think, self.no_think) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

pub async fn run(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let model = args.model.clone().unwrap_or_else(|| config.model.clone());
    let tool_servers = config.enabled_tool_servers().len();
    let endpoint = config.resolve(&model);
    let runner = TurnRunner::new(config);

    if let Some(message) = &args.message {
        let history = vec![Message::user(message)];
        return match turn(&runner, &args, history).await {
            Ok(_) => Ok(()),
            // Already reported; exit nonzero without repeating it.
            Err(e) if e.is::<TurnNotStarted>() => std::process::exit(1),
            Err(e) => Err(e),
        };
    }

    eprintln!();
    eprintln!("  Tauti: interactive chat");
    eprintln!("  Provider:  {}", endpoint.provider);
    eprintln!("  Endpoint:  {}", endpoint.base_url);
    eprintln!("  Model:     {model}");
    if args.tools {
        eprintln!("  Tools:     {tool_servers} server(s)");
    }
    eprintln!();
    eprintln!("  Type your message and press Enter. Ctrl+C stops a reply;");
    eprintln!("  'exit' or end of input quits.");
    eprintln!();

    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("  You > ");
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        history.push(Message::user(line));
        match turn(&runner, &args, history.clone()).await {
            Ok(reply) if !reply.is_empty() => history.push(Message::assistant(reply)),
            Ok(_) => {}
            // The turn failed before any output; drop the unanswered message.
            Err(e) if e.is::<TurnNotStarted>() => {
                history.pop();
            }
            Err(e) => return Err(e),
        }
        println!();
    }

    eprintln!();
    Ok(())
}

/// Run one turn, printing its events. Returns the streamed model text.
async fn turn(
    runner: &TurnRunner,
    args: &ChatArgs,
    history: Vec<Message>,
) -> Result<String, Box<dyn std::error::Error>> {
    let options = TurnOptions {
        model: args.model.clone(),
        history,
        think: args.think(),
        tools: args.tools,
        ..TurnOptions::default()
    };

    // Starting can wait on a backend launch; Ctrl+C abandons it.
    let started = tokio::select! {
        started = runner.start(options) => started,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n  [Cancelled]");
            return Err(TurnNotStarted.into());
        }
    };
    let mut handle = match started {
        Ok(handle) => handle,
        Err(e) => {
            report_start_error(&e);
            return Err(TurnNotStarted.into());
        }
    };

    let mut reply = String::new();
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            event = handle.next() => event,
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                eprintln!("\n  [Cancelled]");
                break;
            }
        };
        let Some(event) = event else { break };

        if args.json {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        } else {
            if let TurnEvent::Chunk { content } = &event {
                reply.push_str(content);
            }
            if let Some(text) = event.text() {
                write!(stdout, "{text}")?;
            }
            if let TurnEvent::Done {
                outcome: TurnOutcome::Failed { error },
            } = &event
            {
                tracing::debug!(error = %error, "Turn failed");
            }
        }
        stdout.flush()?;

        if event.is_done() {
            break;
        }
    }

    if !args.json {
        writeln!(stdout)?;
    }
    Ok(reply)
}

/// The turn ended before producing output; the reason is already on stderr.
#[derive(Debug)]
struct TurnNotStarted;

impl std::fmt::Display for TurnNotStarted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("no reply")
    }
}

impl std::error::Error for TurnNotStarted {}

fn report_start_error(error: &Error) {
    match error {
        Error::Provider(ProviderError::ModelNotFound(model)) => {
            eprintln!("  Model '{model}' is not installed.");
            eprintln!("  Download it with: tauti pull {model}");
        }
        Error::Provider(ProviderError::Unavailable { endpoint, .. }) => {
            eprintln!("  The backend at {endpoint} did not come up.");
            eprintln!("  Check that Ollama is installed, or set ollama_path in");
            eprintln!("  {}", AppConfig::config_dir().join("config.toml").display());
        }
        other => eprintln!("  [Error] {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(think: bool, no_think: bool) -> ChatArgs {
        ChatArgs {
            message: None,
            model: None,
            think,
            no_think,
            tools: false,
            json: false,
        }
    }

    #[test]
    fn unstarted_turn_is_recognisable() {
        let err: Box<dyn std::error::Error> = TurnNotStarted.into();
        assert!(err.is::<TurnNotStarted>());
        assert_eq!(err.to_string(), "no reply");
    }

    #[test]
    fn think_defaults_to_config() {
        assert_eq!(args(false, false).think(), None);
        assert_eq!(args(true, false).think(), Some(true));
        assert_eq!(args(false, true).think(), Some(false));
    }
}
