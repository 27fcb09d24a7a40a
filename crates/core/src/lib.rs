//! # Tauti Core
//!
//! Domain types, traits, and error definitions for the Tauti chat
//! orchestration engine. This crate has **no I/O of its own**: it defines
//! the vocabulary every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Backends are reached through the [`Provider`] trait defined here.
//! Implementations live in `tauti-providers`. This enables:
//! - Swapping Ollama / OpenAI-compatible backends per model
//! - Easy testing with scripted mock providers
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod request;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk};
pub use request::{ChatRequest, ProviderKind, ResolvedEndpoint};
pub use tool::{ToolCall, ToolResult, ToolValue};
