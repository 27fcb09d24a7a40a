//! LLM backend implementations for Tauti.
//!
//! All providers implement the `tauti_core::Provider` trait.
//! The router picks the implementation from a resolved endpoint; the
//! availability manager launches a self-hosted backend on demand.

pub mod availability;
mod http;
pub mod ollama;
pub mod openai_compat;
pub mod router;

pub use availability::{AvailabilityManager, BackendLauncher, OllamaLauncher};
pub use ollama::{OllamaProvider, PullProgress};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_provider};
