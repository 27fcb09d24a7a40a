//! Shared test helpers: scripted providers and tool invokers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tauti_config::ToolServerConfig;
use tauti_core::error::ProviderError;
use tauti_core::message::Message;
use tauti_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk};
use tauti_core::tool::{ToolCall, ToolResult};
use tauti_tools::ToolInvoker;
use tokio::sync::mpsc;

enum Mode {
    /// Each response streamed chunk by chunk, then `done`.
    Streaming,
    /// `stream()` fails; `complete()` answers.
    BlockingOnly,
    /// Chunks without the terminal marker.
    Truncated,
    /// A stream that never yields; model listing never answers either.
    Stalled,
}

/// A mock provider that answers with a sequence of scripted responses.
///
/// Each call returns the next response in the queue. Panics if more calls
/// are made than responses provided.
pub struct ScriptedProvider {
    mode: Mode,
    responses: Vec<Vec<String>>,
    next: AtomicUsize,
    stream_calls: AtomicUsize,
    complete_calls: AtomicUsize,
    held: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
    seen: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn with_mode(mode: Mode, responses: Vec<Vec<&str>>) -> Self {
        Self {
            mode,
            responses: responses
                .into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
            next: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            complete_calls: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn streaming(responses: Vec<Vec<&str>>) -> Self {
        Self::with_mode(Mode::Streaming, responses)
    }

    /// One whole-text response per call.
    pub fn texts(responses: Vec<&str>) -> Self {
        Self::streaming(responses.into_iter().map(|r| vec![r]).collect())
    }

    pub fn blocking_only(responses: Vec<&str>) -> Self {
        Self::with_mode(Mode::BlockingOnly, responses.into_iter().map(|r| vec![r]).collect())
    }

    pub fn truncated(chunks: Vec<&str>) -> Self {
        Self::with_mode(Mode::Truncated, vec![chunks])
    }

    pub fn stalled() -> Self {
        Self::with_mode(Mode::Stalled, vec![])
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn next_response(&self, request: &ProviderRequest) -> Vec<String> {
        self.seen.lock().unwrap().push(request.clone());
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        match self.responses.get(i) {
            Some(r) => r.clone(),
            None => panic!(
                "ScriptedProvider: no more responses (call #{i}, have {})",
                self.responses.len()
            ),
        }
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let content = self.next_response(&request).concat();
        Ok(ProviderResponse {
            content,
            model: request.model,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        if matches!(self.mode, Mode::Stalled) {
            std::future::pending::<()>().await;
        }
        Ok(vec!["mock-model".to_string()])
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);

        match self.mode {
            Mode::BlockingOnly => {
                return Err(ProviderError::Network("streaming not supported".into()));
            }
            Mode::Stalled => {
                self.held.lock().unwrap().push(tx);
                return Ok(rx);
            }
            Mode::Streaming | Mode::Truncated => {}
        }

        let chunks = self.next_response(&request);
        let terminate = matches!(self.mode, Mode::Streaming);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(StreamChunk::text(chunk))).await.is_err() {
                    return;
                }
            }
            if terminate {
                let _ = tx.send(Ok(StreamChunk::done())).await;
            }
        });
        Ok(rx)
    }
}

/// A tool invoker returning scripted results and recording calls.
pub struct ScriptedTools {
    results: Mutex<Vec<ToolResult>>,
    calls: Mutex<Vec<ToolCall>>,
}

impl ScriptedTools {
    pub fn new(results: Vec<ToolResult>) -> Self {
        Self {
            results: Mutex::new(results),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolInvoker for ScriptedTools {
    async fn dispatch(&self, _servers: &[ToolServerConfig], call: &ToolCall) -> ToolResult {
        self.calls.lock().unwrap().push(call.clone());
        let mut results = self.results.lock().unwrap();
        if results.is_empty() {
            panic!("ScriptedTools: no more results for {}", call.name);
        }
        results.remove(0)
    }
}

pub fn request(stream: bool) -> ProviderRequest {
    ProviderRequest {
        model: "mock-model".into(),
        messages: vec![Message::user("hi")],
        temperature: None,
        think: false,
        stream,
    }
}
