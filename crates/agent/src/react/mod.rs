//! ReAct loop controller: Thought → Action → Observation, bounded.
//!
//! Each cycle asks the model for a response (streamed to the caller as it
//! arrives), parses it, and either concludes or runs the named tool and
//! feeds the observation into the next cycle's prompt.
//!
//! The loop ends in exactly one of four ways:
//! - **Concluded**: the response named no action
//! - **Aborted**: malformed action arguments, or the tool failed everywhere
//! - **Exhausted**: `max_attempts` cycles ran without a conclusion
//! - **Errored**: the backend stream failed mid-cycle
//!
//! Every ending except a silent conclusion is announced with a notice, and
//! the last event is always `TurnEvent::Done`. Cancellation stops the loop
//! without any further event.

pub mod parser;
pub mod prompt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tauti_config::{MalformedActionPolicy, ReactConfig, ToolServerConfig};
use tauti_core::provider::Provider;
use tauti_core::request::ChatRequest;
use tauti_core::tool::ToolCall;
use tauti_tools::ToolInvoker;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{Next, StreamSession};
use crate::stream_event::{self, TurnEvent, TurnOutcome};
use parser::{ParsedResponse, parse_response};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// One Thought → Action → Observation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActCycle {
    /// 1-based
    pub index: u32,
    pub thought: String,
    pub action: Option<ToolCall>,
    pub observation: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    Concluded,
    Aborted,
    Exhausted,
    Errored,
}

/// The record of one tool-augmented turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub cycles: Vec<ReActCycle>,
    /// True when the model produced a final answer.
    pub completed: bool,
    pub max_attempts: u32,
    pub attempts: u32,
    pub outcome: LoopOutcome,
}

impl TaskExecution {
    /// The thought of the last cycle; the answer when the loop concluded.
    pub fn final_thought(&self) -> Option<&str> {
        self.cycles.last().map(|c| c.thought.as_str())
    }

    pub fn tool_calls_made(&self) -> usize {
        self.cycles.iter().filter(|c| c.action.is_some()).count()
    }
}

/// Drives one tool-augmented turn.
pub struct ReactLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<dyn ToolInvoker>,
    max_attempts: u32,
    on_malformed_action: MalformedActionPolicy,
    streaming: bool,
    cancel: CancellationToken,
}

impl ReactLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<dyn ToolInvoker>) -> Self {
        let defaults = ReactConfig::default();
        Self {
            provider,
            tools,
            max_attempts: defaults.max_attempts,
            on_malformed_action: defaults.on_malformed_action,
            streaming: true,
            cancel: CancellationToken::new(),
        }
    }

    /// Apply the `[react]` settings.
    pub fn with_config(mut self, config: &ReactConfig) -> Self {
        self.max_attempts = config.max_attempts;
        self.on_malformed_action = config.on_malformed_action;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_malformed_action_policy(mut self, policy: MalformedActionPolicy) -> Self {
        self.on_malformed_action = policy;
        self
    }

    /// Stream each cycle's response (default), or use one blocking call per
    /// cycle.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Tie the loop to a turn's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the loop on a new task. Events arrive in order and the channel
    /// closes after `Done`, or without `Done` if the loop was cancelled.
    pub fn spawn(self, request: ChatRequest, servers: Vec<ToolServerConfig>) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            if self.run(&request, &servers, &tx).await.is_none() {
                debug!(model = %request.model, "ReAct loop stopped before completion");
            }
        });
        rx
    }

    /// Run the loop, sending events to `tx`. Returns `None` if the loop was
    /// cancelled or the receiver went away.
    pub async fn run(
        &self,
        request: &ChatRequest,
        servers: &[ToolServerConfig],
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Option<TaskExecution> {
        let servers: Vec<ToolServerConfig> = servers.iter().filter(|s| s.enabled).cloned().collect();
        let mut cycles: Vec<ReActCycle> = Vec::new();
        let mut attempts = 0;

        let outcome = loop {
            if attempts >= self.max_attempts {
                info!(max_attempts = self.max_attempts, "ReAct attempts exhausted");
                self.emit(
                    tx,
                    TurnEvent::info(format!(
                        "\n\n[Info] Reached maximum ReAct attempts ({}). Providing current analysis.",
                        self.max_attempts
                    )),
                )
                .await?;
                break LoopOutcome::Exhausted;
            }
            attempts += 1;
            info!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                model = %request.model,
                "ReAct cycle"
            );

            let messages = prompt::augmented_messages(&servers, &cycles, &request.messages);
            let provider_request = request.provider_request(messages, self.streaming);
            let mut session = StreamSession::open(self.provider.clone(), provider_request, &self.cancel);

            let mut response = String::new();
            let stream_error = loop {
                match session.next_fragment().await {
                    Next::Fragment(text) => {
                        response.push_str(&text);
                        self.emit(tx, TurnEvent::chunk(text)).await?;
                    }
                    Next::End => break None,
                    Next::Error(e) => break Some(e),
                    Next::Cancelled => return None,
                }
            };

            if let Some(e) = stream_error {
                warn!(attempt = attempts, error = %e, "ReAct cycle failed");
                cycles.push(ReActCycle::new(attempts, response.trim()).failed(e.to_string()));
                self.emit(tx, TurnEvent::error(format!("\n\n[Error] {e}"))).await?;
                break LoopOutcome::Errored;
            }

            let call = match parse_response(&response) {
                Ok(ParsedResponse { thought, action: None }) => {
                    debug!(attempt = attempts, "No action, concluding");
                    cycles.push(ReActCycle::new(attempts, thought));
                    break LoopOutcome::Concluded;
                }
                Ok(ParsedResponse { thought, action: Some(call) }) => {
                    cycles.push(ReActCycle::new(attempts, thought));
                    call
                }
                Err(err) => match self.on_malformed_action {
                    MalformedActionPolicy::Abort => {
                        warn!(tool = %err.tool, reason = %err.reason, "Malformed action arguments");
                        let raw = err.raw.clone();
                        cycles.push(ReActCycle::new(attempts, err.thought.clone()).failed(err.to_string()));
                        self.emit(
                            tx,
                            TurnEvent::error(format!("\n\n[Error] Invalid tool arguments format: {raw}")),
                        )
                        .await?;
                        break LoopOutcome::Aborted;
                    }
                    MalformedActionPolicy::Conclude => {
                        debug!(tool = %err.tool, "Malformed action treated as final answer");
                        cycles.push(ReActCycle::new(attempts, response.trim()));
                        break LoopOutcome::Concluded;
                    }
                },
            };

            info!(attempt = attempts, tool = %call.name, "Dispatching tool call");
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = self.tools.dispatch(&servers, &call) => result,
            };
            let observation = prompt::observation_text(&result);
            self.emit(
                tx,
                TurnEvent::Observation {
                    content: format!("\n\nObservation: {observation}\n\n"),
                },
            )
            .await?;

            let success = result.is_success();
            if let Some(cycle) = cycles.last_mut() {
                cycle.action = Some(call);
                cycle.observation = Some(observation);
                cycle.success = success;
                cycle.error = result.error().map(str::to_string);
            }

            if !success {
                warn!(attempt = attempts, "Tool call failed on every server");
                self.emit(
                    tx,
                    TurnEvent::error(
                        "\n\n[Error] Tool call failed after trying all available tool servers.",
                    ),
                )
                .await?;
                break LoopOutcome::Aborted;
            }
        };

        let execution = TaskExecution {
            cycles,
            completed: outcome == LoopOutcome::Concluded,
            max_attempts: self.max_attempts,
            attempts,
            outcome,
        };
        info!(
            outcome = ?execution.outcome,
            attempts = execution.attempts,
            tool_calls = execution.tool_calls_made(),
            "ReAct loop finished"
        );

        self.emit(
            tx,
            TurnEvent::Done {
                outcome: TurnOutcome::React(execution.clone()),
            },
        )
        .await?;
        Some(execution)
    }

    async fn emit(&self, tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) -> Option<()> {
        stream_event::emit(tx, &self.cancel, event).await
    }
}

impl ReActCycle {
    fn new(index: u32, thought: impl Into<String>) -> Self {
        Self {
            index,
            thought: thought.into(),
            action: None,
            observation: None,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    fn failed(mut self, error: String) -> Self {
        self.success = false;
        self.error = Some(error);
        self
    }
}
