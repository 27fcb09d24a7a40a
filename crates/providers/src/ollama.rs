//! Native Ollama provider.
//!
//! Talks to the daemon's own API rather than its OpenAI shim:
//! - `POST /api/chat` (NDJSON when streaming, `/api/generate` fallback)
//! - `GET /api/tags` for model listing and the reachability probe
//! - `POST /api/pull` for model downloads with progress

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tauti_core::error::ProviderError;
use tauti_core::message::Message;
use tauti_core::provider::*;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::http::{LineBuffer, build_client, check_status, error_message, network_error};

/// Suffix that turns thinking off on models without the reasoning option.
const NO_THINK_SUFFIX: &str = " /no_think";

pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
    /// Pulls can take many minutes; no overall timeout.
    pull_client: reqwest::Client,
}

/// One progress line of a model download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullProgress {
    pub status: String,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    /// 0-100, present when both byte counts are known
    #[serde(default)]
    pub percent: Option<u8>,
}

impl PullProgress {
    fn from_line(line: PullLine) -> Self {
        let percent = match (line.completed, line.total) {
            (Some(done), Some(total)) if total > 0 => {
                Some(((done.min(total) * 100) / total) as u8)
            }
            _ => None,
        };
        Self {
            status: line.status,
            completed: line.completed,
            total: line.total,
            percent,
        }
    }

    /// The daemon's final status line.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: build_client(Duration::from_secs(300)),
            pull_client: reqwest::Client::new(),
        }
    }

    /// Build the message list, applying the think toggle.
    fn to_api_messages(messages: &[Message], think: bool) -> Vec<ApiMessage> {
        let mut out: Vec<ApiMessage> = messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();
        if !think && let Some(last) = out.last_mut() {
            last.content.push_str(NO_THINK_SUFFIX);
        }
        out
    }

    fn options(request: &ProviderRequest) -> Option<serde_json::Value> {
        let mut options = serde_json::Map::new();
        if request.think {
            options.insert(
                "reasoning".into(),
                serde_json::json!({ "effort": "medium" }),
            );
        }
        if let Some(t) = request.temperature {
            options.insert("temperature".into(), serde_json::json!(t));
        }
        (!options.is_empty()).then_some(serde_json::Value::Object(options))
    }

    fn chat_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages, request.think),
            "stream": stream,
        });
        if let Some(options) = Self::options(request) {
            body["options"] = options;
        }
        body
    }

    /// `/api/generate` body: the conversation flattened into one prompt.
    fn generate_body(request: &ProviderRequest) -> serde_json::Value {
        let mut prompt = request
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        if !request.think {
            prompt.push_str(NO_THINK_SUFFIX);
        }
        let mut body = serde_json::json!({
            "model": request.model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(options) = Self::options(request) {
            body["options"] = options;
        }
        body
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %request.model, "Falling back to /api/generate");

        let response = self
            .client
            .post(&url)
            .json(&Self::generate_body(request))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status("ollama", response).await?;
        let body: GenerateResponse = response.json().await.map_err(network_error)?;
        Ok(body.response)
    }

    /// Whether `model` is present locally. A bare name also matches its
    /// `:latest` tag.
    pub async fn has_model(&self, model: &str) -> Result<bool, ProviderError> {
        let models = self.list_models().await?;
        let latest = format!("{model}:latest");
        Ok(models.iter().any(|m| m == model || *m == latest))
    }

    /// Start downloading `model`; progress arrives on the returned channel,
    /// ending with a `success` status or an error.
    pub async fn pull_model(
        &self,
        model: &str,
    ) -> Result<mpsc::Receiver<Result<PullProgress, ProviderError>>, ProviderError> {
        let url = format!("{}/api/pull", self.base_url);
        info!(model, "Pulling model");

        let response = self
            .pull_client
            .post(&url)
            .json(&serde_json::json!({ "model": model, "stream": true }))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status("ollama", response).await?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(pump_pull(response.bytes_stream(), tx));
        Ok(rx)
    }
}

#[async_trait]
impl tauti_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(model = %request.model, think = request.think, "Sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&Self::chat_body(&request, false))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status("ollama", response).await?;
        let body: ChatResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse response: {e}"),
        })?;

        let content = body
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .or(body.response.filter(|c| !c.is_empty()));

        let content = match content {
            Some(content) => content,
            None => self.generate(&request).await?,
        };

        if content.is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: "ollama".into(),
                detail: format!("no content from /api/chat or /api/generate for {}", request.model),
            });
        }

        Ok(ProviderResponse {
            content,
            model: body.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(model = %request.model, think = request.think, "Sending streaming chat request");

        let response = self
            .client
            .post(&url)
            .json(&Self::chat_body(&request, true))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status("ollama", response).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_ndjson(response.bytes_stream(), tx));
        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(network_error)?;
        let response = check_status("ollama", response).await?;
        let tags: TagsResponse = response.json().await.map_err(network_error)?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(network_error)?;
        Ok(response.status().is_success())
    }
}

/// Forward `/api/chat` NDJSON lines as chunks. Each line is
/// `{"message":{"content":…},"done":bool}`; a body that ends before a
/// `done: true` line is `StreamInterrupted`.
pub(crate) async fn pump_ndjson<S, B, E>(
    byte_stream: S,
    tx: mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
) where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut buffer = LineBuffer::default();
    let mut ended = false;

    loop {
        let line = match buffer.next_line() {
            Some(line) => line,
            None if ended => match buffer.finish() {
                Some(line) => line,
                None => break,
            },
            None => {
                match byte_stream.next().await {
                    Some(Ok(bytes)) => buffer.push(bytes.as_ref()),
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                    None => ended = true,
                }
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let parsed: ChatStreamLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!(line = %line, error = %e, "Ignoring unparseable NDJSON line");
                continue;
            }
        };

        if let Some(error) = parsed.error {
            let _ = tx
                .send(Err(ProviderError::ApiError {
                    status_code: 200,
                    message: error,
                }))
                .await;
            return;
        }

        if let Some(content) = parsed.message.map(|m| m.content).filter(|c| !c.is_empty())
            && tx.send(Ok(StreamChunk::text(content))).await.is_err()
        {
            return; // receiver dropped
        }

        if parsed.done {
            let _ = tx.send(Ok(StreamChunk::done())).await;
            return;
        }
    }

    let _ = tx
        .send(Err(ProviderError::StreamInterrupted(
            "ollama stream closed before done".into(),
        )))
        .await;
}

async fn pump_pull<S, B, E>(
    byte_stream: S,
    tx: mpsc::Sender<std::result::Result<PullProgress, ProviderError>>,
) where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut buffer = LineBuffer::default();

    while let Some(chunk) = byte_stream.next().await {
        match chunk {
            Ok(bytes) => buffer.push(bytes.as_ref()),
            Err(e) => {
                let _ = tx.send(Err(ProviderError::Network(e.to_string()))).await;
                return;
            }
        }

        while let Some(line) = buffer.next_line() {
            if line.trim().is_empty() {
                continue;
            }
            let item = match serde_json::from_str::<PullLine>(&line) {
                Ok(parsed) => match parsed.error.clone() {
                    Some(error) => Err(ProviderError::ApiError {
                        status_code: 200,
                        message: error,
                    }),
                    None => Ok(PullProgress::from_line(parsed)),
                },
                Err(_) => {
                    warn!(line = %line, "Unexpected pull progress line");
                    Err(ProviderError::ApiError {
                        status_code: 200,
                        message: error_message(&line),
                    })
                }
            };
            let stop = item.is_err();
            if tx.send(item).await.is_err() || stop {
                return;
            }
        }
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamLine {
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: String,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(think: bool) -> ProviderRequest {
        ProviderRequest {
            model: "qwen3:0.6b".into(),
            messages: vec![Message::user("first"), Message::user("hello")],
            temperature: None,
            think,
            stream: true,
        }
    }

    async fn collect_ndjson(
        parts: Vec<&'static str>,
    ) -> Vec<std::result::Result<StreamChunk, ProviderError>> {
        let stream = futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, std::io::Error>(p.as_bytes())),
        );
        let (tx, mut rx) = mpsc::channel(16);
        pump_ndjson(stream, tx).await;
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn think_sends_reasoning_option() {
        let body = OllamaProvider::chat_body(&request(true), true);
        assert_eq!(body["options"]["reasoning"]["effort"], "medium");
        assert_eq!(body["messages"][1]["content"], "hello");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn no_think_appends_suffix_to_last_message_only() {
        let body = OllamaProvider::chat_body(&request(false), false);
        assert!(body.get("options").is_none());
        assert_eq!(body["messages"][0]["content"], "first");
        assert_eq!(body["messages"][1]["content"], "hello /no_think");
    }

    #[test]
    fn generate_body_flattens_conversation() {
        let body = OllamaProvider::generate_body(&request(false));
        assert_eq!(body["prompt"], "user: first\nuser: hello /no_think");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn temperature_goes_into_options() {
        let mut req = request(false);
        req.temperature = Some(0.2);
        let body = OllamaProvider::chat_body(&req, false);
        assert!((body["options"]["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ndjson_stream_until_done() {
        let items = collect_ndjson(vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n{\"message\":{\"role\":\"assistant\",\"content\":\"\"},",
            "\"done\":true}",
        ])
        .await;
        let chunks: Vec<StreamChunk> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].content.as_deref(), Some("lo"));
        assert!(chunks[2].done);
    }

    #[tokio::test]
    async fn ndjson_stream_without_done_is_interrupted() {
        let items = collect_ndjson(vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"partial\"},\"done\":false}\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn ndjson_error_line_is_api_error() {
        let items = collect_ndjson(vec!["{\"error\":\"model 'nope' not found\"}\n"]).await;
        assert_eq!(items.len(), 1);
        match &items[0] {
            Err(ProviderError::ApiError { message, .. }) => assert!(message.contains("nope")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pull_progress_reports_percent() {
        let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(
            "{\"status\":\"pulling manifest\"}\n{\"status\":\"downloading\",\"digest\":\"sha256:abc\",\"total\":200,\"completed\":50}\n{\"status\":\"success\"}\n"
                .as_bytes(),
        )]);
        let (tx, mut rx) = mpsc::channel(8);
        pump_pull(stream, tx).await;

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.status, "pulling manifest");
        assert!(first.percent.is_none());

        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.percent, Some(25));

        let last = rx.recv().await.unwrap().unwrap();
        assert!(last.is_success());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn parse_tags() {
        let data = r#"{"models":[{"name":"qwen3:0.6b","size":1},{"name":"llama3:latest"}]}"#;
        let tags: TagsResponse = serde_json::from_str(data).unwrap();
        let names: Vec<_> = tags.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["qwen3:0.6b", "llama3:latest"]);
    }
}
