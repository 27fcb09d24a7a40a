//! Provider router: builds the backend for a resolved endpoint and keeps
//! one availability manager per self-hosted endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tauti_config::AppConfig;
use tauti_core::provider::Provider;
use tauti_core::request::{ProviderKind, ResolvedEndpoint};

use crate::availability::AvailabilityManager;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Build the provider that speaks `endpoint`'s protocol.
pub fn build_provider(endpoint: &ResolvedEndpoint) -> Arc<dyn Provider> {
    match endpoint.provider {
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(&endpoint.base_url)),
        ProviderKind::OpenAi => Arc::new(OpenAiCompatProvider::new(
            "openai",
            &endpoint.base_url,
            endpoint.api_key.clone(),
        )),
    }
}

/// Hands out providers and shares availability managers across turns, so a
/// launch started by one turn is awaited, not repeated, by the next.
#[derive(Default)]
pub struct ProviderRouter {
    managers: Mutex<HashMap<String, Arc<AvailabilityManager>>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provider(&self, endpoint: &ResolvedEndpoint) -> Arc<dyn Provider> {
        build_provider(endpoint)
    }

    /// Availability manager for `endpoint`, or `None` when the backend is
    /// not self-hosted.
    pub fn availability(
        &self,
        endpoint: &ResolvedEndpoint,
        config: &AppConfig,
    ) -> Option<Arc<AvailabilityManager>> {
        if !endpoint.provider.is_self_hosted() {
            return None;
        }

        let key = endpoint.base_url.trim_end_matches('/').to_string();
        let mut managers = self
            .managers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let manager = managers.entry(key).or_insert_with(|| {
            Arc::new(AvailabilityManager::for_ollama(
                &endpoint.base_url,
                config.ollama_path.as_deref(),
                &config.availability,
            ))
        });
        Some(manager.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(provider: ProviderKind, base_url: &str) -> ResolvedEndpoint {
        ResolvedEndpoint {
            provider,
            base_url: base_url.into(),
            api_key: None,
        }
    }

    #[test]
    fn builds_provider_by_kind() {
        let ollama = build_provider(&endpoint(ProviderKind::Ollama, "http://localhost:11434"));
        assert_eq!(ollama.name(), "ollama");
        let openai = build_provider(&endpoint(ProviderKind::OpenAi, "https://api.example.com"));
        assert_eq!(openai.name(), "openai");
    }

    #[test]
    fn availability_only_for_self_hosted() {
        let router = ProviderRouter::new();
        let config = AppConfig::default();
        assert!(
            router
                .availability(&endpoint(ProviderKind::OpenAi, "https://api.example.com"), &config)
                .is_none()
        );
        assert!(
            router
                .availability(&endpoint(ProviderKind::Ollama, "http://localhost:11434"), &config)
                .is_some()
        );
    }

    #[test]
    fn managers_are_shared_per_endpoint() {
        let router = ProviderRouter::new();
        let config = AppConfig::default();
        let a = router
            .availability(&endpoint(ProviderKind::Ollama, "http://localhost:11434"), &config)
            .unwrap();
        let b = router
            .availability(&endpoint(ProviderKind::Ollama, "http://localhost:11434/"), &config)
            .unwrap();
        let c = router
            .availability(&endpoint(ProviderKind::Ollama, "http://gpu-box:11434"), &config)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
