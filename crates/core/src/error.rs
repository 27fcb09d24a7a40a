//! Error types for the Tauti domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Tauti operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Backend unavailable at {endpoint}: {reason}")]
    Unavailable { endpoint: String, reason: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty response from {provider}: {detail}")]
    EmptyResponse { provider: String, detail: String },
}

/// Plumbing failures around a tool call.
///
/// A tool that runs and reports failure is *not* a `ToolError`: that is a
/// [`crate::tool::ToolResult::Failure`]. These variants cover what happens
/// before or around the child process.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to spawn tool server '{server}': {reason}")]
    SpawnFailed { server: String, reason: String },

    #[error("Tool server '{server}' timed out after {timeout_secs}s")]
    Timeout { server: String, timeout_secs: u64 },

    #[error("Failed to prepare tool request: {0}")]
    RequestIo(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 500,
            message: "model crashed".into(),
        });
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("model crashed"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::Timeout {
            server: "fs".into(),
            timeout_secs: 30,
        });
        assert!(err.to_string().contains("fs"));
        assert!(err.to_string().contains("30s"));
    }
}
