//! The per-turn request handed from configuration into the engine.

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::provider::ProviderRequest;

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Self-hosted Ollama daemon (native `/api/*` endpoints).
    #[default]
    Ollama,
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    #[serde(alias = "openai-compatible", alias = "openai_compat")]
    OpenAi,
}

impl ProviderKind {
    /// Whether the availability manager should probe and launch this backend.
    pub fn is_self_hosted(&self) -> bool {
        matches!(self, Self::Ollama)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The concrete (provider, base endpoint, credential) triple for one model.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEndpoint {
    pub provider: ProviderKind,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ResolvedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedEndpoint")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]").unwrap_or("None"),
            )
            .finish()
    }
}

/// Everything one chat turn needs. Immutable once the turn starts.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub endpoint: ResolvedEndpoint,
    pub model: String,
    pub messages: Vec<Message>,
    pub think: bool,
    pub tools_enabled: bool,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Build the backend request for this turn with the given message list
    /// (the turn history, or an augmented prompt in a ReAct cycle).
    pub fn provider_request(&self, messages: Vec<Message>, stream: bool) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            think: self.think,
            stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_lowercase() {
        let kind: ProviderKind = serde_json::from_str(r#""openai""#).unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
        let kind: ProviderKind = serde_json::from_str(r#""ollama""#).unwrap();
        assert!(kind.is_self_hosted());
    }

    #[test]
    fn endpoint_debug_redacts_key() {
        let ep = ResolvedEndpoint {
            provider: ProviderKind::OpenAi,
            base_url: "https://api.example.com".into(),
            api_key: Some("sk-secret".into()),
        };
        let dbg = format!("{ep:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn provider_request_carries_turn_settings() {
        let req = ChatRequest {
            endpoint: ResolvedEndpoint {
                provider: ProviderKind::Ollama,
                base_url: "http://localhost:11434".into(),
                api_key: None,
            },
            model: "qwen3:0.6b".into(),
            messages: vec![Message::user("hi")],
            think: true,
            tools_enabled: false,
            temperature: Some(0.6),
        };
        let pr = req.provider_request(req.messages.clone(), true);
        assert_eq!(pr.model, "qwen3:0.6b");
        assert!(pr.think);
        assert!(pr.stream);
        assert_eq!(pr.messages.len(), 1);
    }
}
