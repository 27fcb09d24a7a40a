//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, vLLM, llama.cpp server, LM Studio and any
//! endpoint exposing `{base}/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Model listing and health checks via `{base}/models`

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tauti_core::error::ProviderError;
use tauti_core::message::Message;
use tauti_core::provider::*;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::http::{LineBuffer, build_client, check_status, network_error};

/// Temperature sent when the request does not carry one.
const DEFAULT_TEMPERATURE: f32 = 0.6;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider. An empty key means no
    /// `Authorization` header is sent.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: build_client(Duration::from_secs(120)),
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", Some(api_key.into()))
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            "stream": stream,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl tauti_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, false);

        debug!(
            provider = %self.name,
            model = %request.model,
            authorized = self.api_key.is_some(),
            "Sending completion request"
        );

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(&self.name, response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: self.name.clone(),
                detail: "no choices in response".into(),
            })?;

        Ok(ProviderResponse {
            content,
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self
            .authorized(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(&self.name, response).await?;

        let (tx, rx) = mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(pump_sse(provider_name, response.bytes_stream(), tx));

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(&self.name, response).await?;

        let body: ModelList = response.json().await.map_err(network_error)?;
        Ok(body.data.into_iter().map(|m| m.id).collect())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(network_error)?;

        Ok(response.status().is_success())
    }
}

/// Read an SSE byte stream and forward content deltas.
///
/// The stream is well-formed only if it ends with `data: [DONE]` or a choice
/// carrying a `finish_reason`; a body that ends before either is reported as
/// `StreamInterrupted`.
pub(crate) async fn pump_sse<S, B, E>(
    provider_name: String,
    byte_stream: S,
    tx: mpsc::Sender<std::result::Result<StreamChunk, ProviderError>>,
) where
    S: Stream<Item = std::result::Result<B, E>> + Send,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut buffer = LineBuffer::default();
    let mut finished = false;

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };
        buffer.push(bytes.as_ref());

        while let Some(line) = buffer.next_line() {
            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                let _ = tx.send(Ok(StreamChunk::done())).await;
                return;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    let Some(choice) = stream_resp.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty())
                        && tx.send(Ok(StreamChunk::text(content))).await.is_err()
                    {
                        return; // receiver dropped
                    }

                    if choice.finish_reason.is_some() {
                        finished = true;
                    }
                }
                Err(e) => {
                    trace!(
                        provider = %provider_name,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }
    }

    let terminal = if finished {
        Ok(StreamChunk::done())
    } else {
        Err(ProviderError::StreamInterrupted(format!(
            "{provider_name} stream closed without a completion marker"
        )))
    };
    let _ = tx.send(terminal).await;
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tauti_core::Provider;

    async fn collect_sse(
        parts: Vec<&'static str>,
    ) -> Vec<std::result::Result<StreamChunk, ProviderError>> {
        let stream = futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, std::io::Error>(p.as_bytes())),
        );
        let (tx, mut rx) = mpsc::channel(16);
        pump_sse("test".into(), stream, tx).await;
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn openai_constructor() {
        let provider = OpenAiCompatProvider::openai("sk-test");
        assert_eq!(provider.name(), "openai");
        assert!(provider.base_url.contains("api.openai.com"));
    }

    #[test]
    fn empty_key_means_no_auth() {
        let provider = OpenAiCompatProvider::new("custom", "http://localhost:8000/v1/", Some("".into()));
        assert!(provider.api_key.is_none());
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::user("Hello"), Message::assistant("Hi")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "user");
        assert_eq!(api_messages[1].role, "assistant");
    }

    #[test]
    fn request_body_defaults_temperature() {
        let request = ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::user("hi")],
            temperature: None,
            think: true,
            stream: true,
        };
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert!((body["temperature"].as_f64().unwrap() - 0.6).abs() < 1e-6);
        assert!(body.get("options").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn parse_stream_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(parsed.choices[0].finish_reason.is_none());
    }

    #[test]
    fn parse_stream_finish_chunk() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let parsed: StreamResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(parsed.choices[0].delta.content.is_none());
    }

    #[tokio::test]
    async fn sse_stream_with_done_marker() {
        let items = collect_sse(vec![
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DO",
            "NE]\n\n",
        ])
        .await;
        let chunks: Vec<StreamChunk> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].content.as_deref(), Some("lo"));
        assert!(chunks[2].done);
    }

    #[tokio::test]
    async fn sse_stream_finish_reason_without_done_completes() {
        let items = collect_sse(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"},\"finish_reason\":\"stop\"}]}\n\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn sse_stream_truncated_is_interrupted() {
        let items = collect_sse(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n"]).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[test]
    fn parse_model_list() {
        let data = r#"{"object":"list","data":[{"id":"gpt-4o","object":"model"},{"id":"gpt-4o-mini"}]}"#;
        let parsed: ModelList = serde_json::from_str(data).unwrap();
        let ids: Vec<_> = parsed.data.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
    }
}
