//! JSON-RPC request envelopes and classification of what a tool server
//! printed back.

use serde::Serialize;
use serde_json::Value;
use tauti_core::error::ToolError;
use tauti_core::tool::{ToolCall, ToolResult, ToolValue};

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn initialize(id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: "initialize",
            params: serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": {
                    "name": "tauti",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        }
    }

    pub fn tools_call(id: u64, call: &ToolCall) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: "tools/call",
            params: serde_json::json!({
                "name": call.name,
                "arguments": call.arguments_json(),
            }),
        }
    }
}

/// Serialize envelopes as newline-delimited JSON.
pub fn encode_ndjson(envelopes: &[JsonRpcRequest]) -> Result<String, ToolError> {
    let mut out = String::new();
    for envelope in envelopes {
        let line = serde_json::to_string(envelope)
            .map_err(|e| ToolError::RequestIo(format!("failed to encode envelope: {e}")))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Classify the standard output of a tool process that exited with 0.
pub fn classify_stdout(stdout: &str, call_id: u64) -> ToolResult {
    let trimmed = stdout.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return classify_value(value);
    }

    // Servers speaking JSON-RPC may print several responses (one per
    // envelope, plus notifications); pick the one answering our call.
    if let Some(response) = trimmed
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        .find(|v| v.get("jsonrpc").is_some() && v.get("id").and_then(Value::as_u64) == Some(call_id))
    {
        return classify_value(response);
    }

    ToolResult::success(trimmed)
}

fn classify_value(value: Value) -> ToolResult {
    let Value::Object(mut map) = value else {
        return ToolResult::success(ToolValue::from(value));
    };

    if map.get("success").and_then(Value::as_bool) == Some(false) {
        let detail = map.remove("error").unwrap_or(Value::Null);
        return ToolResult::failure(error_detail(&detail, "tool reported failure"));
    }

    if let Some(error) = map.get("error").filter(|e| !e.is_null())
        && !map.contains_key("result")
    {
        return ToolResult::failure(error_detail(error, "tool reported an error"));
    }

    if let Some(result) = map.remove("result") {
        return classify_result(result);
    }

    classify_result(Value::Object(map))
}

/// A `result` payload; MCP results flag failure with `isError`.
fn classify_result(result: Value) -> ToolResult {
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let text = content_text(&result)
            .unwrap_or_else(|| "tool reported an error".to_string());
        return ToolResult::failure(text);
    }
    ToolResult::success(ToolValue::from(result))
}

/// Concatenated `text` items of an MCP `content` array.
fn content_text(result: &Value) -> Option<String> {
    let parts: Vec<&str> = result
        .get("content")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn error_detail(error: &Value, fallback: &str) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::Null => fallback.to_string(),
        other => other.to_string(),
    }
}
