//! Turn orchestration: resolve the model, make sure a self-hosted backend
//! is up, then run either a plain streamed turn or a ReAct loop.
//!
//! A [`TurnRunner`] holds a read-only configuration snapshot and is shared
//! by every turn it starts. Each turn gets a child of the runner's root
//! cancellation token, so one turn can be cancelled by id and all of them
//! by [`TurnRunner::shutdown`].

use std::sync::Arc;
use tauti_config::AppConfig;
use tauti_core::error::ProviderError;
use tauti_core::message::{Message, truncate_history};
use tauti_core::provider::Provider;
use tauti_core::request::{ChatRequest, ResolvedEndpoint};
use tauti_providers::ProviderRouter;
use tauti_tools::{ToolDispatcher, ToolInvoker};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::react::ReactLoop;
use crate::session::{CancelHandle, Next, SessionError, SessionRegistry, StreamSession};
use crate::stream_event::{self, TurnEvent, TurnOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 128;

type ProviderFactory = Arc<dyn Fn(&ResolvedEndpoint) -> Arc<dyn Provider> + Send + Sync>;

/// Per-turn choices made by the caller.
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    /// Turn id; a fresh one when `None`. Setting it lets the caller cancel
    /// the turn by id while its backend is still coming up.
    pub id: Option<Uuid>,
    /// Model id; the configured default when `None`.
    pub model: Option<String>,
    pub history: Vec<Message>,
    /// The configured `default_think` when `None`.
    pub think: Option<bool>,
    /// Augment the turn with tool servers (ReAct).
    pub tools: bool,
}

impl TurnOptions {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }
}

pub struct TurnRunner {
    config: Arc<AppConfig>,
    router: ProviderRouter,
    tools: Arc<dyn ToolInvoker>,
    registry: SessionRegistry,
    root: CancellationToken,
    factory: Option<ProviderFactory>,
}

impl TurnRunner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            router: ProviderRouter::new(),
            tools: Arc::new(ToolDispatcher::new()),
            registry: SessionRegistry::new(),
            root: CancellationToken::new(),
            factory: None,
        }
    }

    /// Replace the tool dispatcher.
    pub fn with_tools(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = tools;
        self
    }

    /// Build providers with `factory` instead of the HTTP backends.
    pub fn with_provider_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ResolvedEndpoint) -> Arc<dyn Provider> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start a turn. Fails before any event is produced when a self-hosted
    /// backend cannot be brought up or does not have the model.
    pub async fn start(&self, options: TurnOptions) -> tauti_core::Result<TurnHandle> {
        let config = self.config.clone();
        let model = options.model.unwrap_or_else(|| config.model.clone());
        let endpoint = config.resolve(&model);
        let provider = match &self.factory {
            Some(factory) => factory(&endpoint),
            None => self.router.provider(&endpoint),
        };

        let id = options.id.unwrap_or_else(Uuid::new_v4);
        let token = self.root.child_token();
        let cancel = CancelHandle::new(token.clone());
        let registration = Registration::new(&self.registry, id, cancel.clone());

        info!(
            turn_id = %id,
            model = %model,
            provider = %endpoint.provider,
            tools = options.tools,
            "Starting turn"
        );

        if let Some(manager) = self.router.availability(&endpoint, &config) {
            manager.ensure_available_until(&token).await?;
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(ProviderError::Unavailable {
                        endpoint: endpoint.base_url.clone(),
                        reason: "cancelled while checking for the model".into(),
                    }
                    .into());
                }
                present = ensure_model_present(provider.as_ref(), &model) => present?,
            }
        }

        let servers = if options.tools {
            config.enabled_tool_servers()
        } else {
            Vec::new()
        };

        let request = ChatRequest {
            endpoint,
            model,
            messages: truncate_history(&options.history, config.max_context_messages),
            think: options.think.unwrap_or(config.default_think),
            tools_enabled: !servers.is_empty(),
            temperature: Some(config.temperature),
        };

        let rx = if request.tools_enabled {
            debug!(turn_id = %id, servers = servers.len(), "Turn uses ReAct");
            ReactLoop::new(provider, self.tools.clone())
                .with_config(&config.react)
                .with_streaming(config.streaming_enabled)
                .with_cancellation(token.clone())
                .spawn(request, servers)
        } else {
            spawn_plain(provider, request, config.streaming_enabled, token.clone())
        };

        registration.keep();

        Ok(TurnHandle {
            id,
            rx,
            cancel,
            registry: self.registry.clone(),
        })
    }

    /// Cancel a running turn by id.
    pub fn cancel(&self, id: &Uuid) -> Result<(), SessionError> {
        self.registry.cancel(id)
    }

    pub fn active_turns(&self) -> usize {
        self.registry.len()
    }

    /// Cancel every turn started by this runner, including ones still
    /// waiting for their backend.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.registry.cancel_all();
    }
}

/// Reads one turn's events. Dropping the handle cancels the turn.
pub struct TurnHandle {
    id: Uuid,
    rx: mpsc::Receiver<TurnEvent>,
    cancel: CancelHandle,
    registry: SessionRegistry,
}

impl TurnHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The next event, or `None` once the turn is over. After cancellation
    /// no further event is returned, even if one was already buffered.
    pub async fn next(&mut self) -> Option<TurnEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let event = tokio::select! {
            biased;
            _ = self.cancel.token().cancelled() => None,
            event = self.rx.recv() => event,
        };
        if self.cancel.is_cancelled() {
            return None;
        }
        if event.as_ref().is_none_or(TurnEvent::is_done) {
            self.registry.remove(&self.id);
        }
        event
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.registry.remove(&self.id);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A turn's registry entry while it starts; removed unless the turn gets
/// as far as a [`TurnHandle`].
struct Registration<'a> {
    registry: &'a SessionRegistry,
    id: Uuid,
    kept: bool,
}

impl<'a> Registration<'a> {
    fn new(registry: &'a SessionRegistry, id: Uuid, cancel: CancelHandle) -> Self {
        registry.insert(id, cancel);
        Self {
            registry,
            id,
            kept: false,
        }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.kept {
            self.registry.remove(&self.id);
        }
    }
}

async fn ensure_model_present(provider: &dyn Provider, model: &str) -> Result<(), ProviderError> {
    let models = provider.list_models().await?;
    if models.iter().any(|m| model_matches(m, model)) {
        Ok(())
    } else {
        Err(ProviderError::ModelNotFound(model.to_string()))
    }
}

/// Ollama lists untagged models as `name:latest`.
fn model_matches(listed: &str, wanted: &str) -> bool {
    listed == wanted || listed.strip_suffix(":latest") == Some(wanted)
}

/// A turn without tools: one stream session forwarded as chunks.
fn spawn_plain(
    provider: Arc<dyn Provider>,
    request: ChatRequest,
    streaming: bool,
    token: CancellationToken,
) -> mpsc::Receiver<TurnEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let provider_request = request.provider_request(request.messages.clone(), streaming);

    tokio::spawn(async move {
        let mut session = StreamSession::open(provider, provider_request, &token);
        loop {
            let event = match session.next_fragment().await {
                Next::Fragment(text) => TurnEvent::chunk(text),
                Next::End => {
                    let _ = stream_event::emit(
                        &tx,
                        &token,
                        TurnEvent::Done {
                            outcome: TurnOutcome::Completed,
                        },
                    )
                    .await;
                    return;
                }
                Next::Error(e) => {
                    if stream_event::emit(&tx, &token, TurnEvent::error(format!("\n\n[Error] {e}")))
                        .await
                        .is_some()
                    {
                        let _ = stream_event::emit(
                            &tx,
                            &token,
                            TurnEvent::Done {
                                outcome: TurnOutcome::Failed {
                                    error: e.to_string(),
                                },
                            },
                        )
                        .await;
                    }
                    return;
                }
                Next::Cancelled => return,
            };
            if stream_event::emit(&tx, &token, event).await.is_none() {
                return;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_tag_matches_bare_name() {
        assert!(model_matches("llama3:latest", "llama3"));
        assert!(model_matches("qwen3:0.6b", "qwen3:0.6b"));
        assert!(!model_matches("qwen3:0.6b", "qwen3"));
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let provider = crate::test_helpers::ScriptedProvider::texts(vec![]);
        let err = ensure_model_present(&provider, "llama3").await.unwrap_err();
        assert!(matches!(err, ProviderError::ModelNotFound(m) if m == "llama3"));
    }

    #[test]
    fn options_default_to_config() {
        let options = TurnOptions::new(vec![Message::user("hi")]);
        assert!(options.model.is_none());
        assert!(options.think.is_none());
        assert!(!options.tools);
    }
}
