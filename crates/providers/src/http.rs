//! HTTP plumbing shared by the providers: client construction, status
//! mapping, and line framing for NDJSON / SSE response bodies.

use std::time::Duration;
use tauti_core::error::ProviderError;
use tracing::warn;

/// Build a reqwest client with the given overall request timeout.
pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tauti/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Map a transport failure onto the error taxonomy.
pub(crate) fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Pass successful responses through; turn everything else into a
/// `ProviderError`, pulling a readable message out of JSON error bodies.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    warn!(provider, status, error = %message, "Provider returned error");

    Err(match status {
        401 | 403 => ProviderError::AuthenticationFailed(message),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    })
}

/// Extract `error` / `error.message` from a JSON body, else the raw text.
pub(crate) fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.as_str().or_else(|| e.get("message").and_then(|m| m.as_str())))
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

/// Accumulates response bytes and yields complete `\n`-terminated lines.
///
/// Bytes are decoded only once a whole line is buffered, so a multi-byte
/// character split across network chunks survives intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line with the trailing `\r` stripped.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let line_end = self.buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
        let line = String::from_utf8_lossy(&line[..line_end]);
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Whatever is left once the body has ended (a final unterminated line).
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}
