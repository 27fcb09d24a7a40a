//! Tool dispatcher: run one tool call as a child process of a configured
//! tool server, with ordered fallback across servers.
//!
//! Every outcome of a call, including spawn failures and timeouts, comes
//! back as a [`ToolResult`]; the dispatcher itself never errors.

use async_trait::async_trait;
use std::io::Write as _;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tauti_config::{RequestTransport, ToolServerConfig};
use tauti_core::error::ToolError;
use tauti_core::tool::{ToolCall, ToolResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::envelope::{JsonRpcRequest, classify_stdout, encode_ndjson};

/// Runs a tool call against an ordered list of servers.
///
/// The ReAct loop only sees this trait, so tests can script tool results.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn dispatch(&self, servers: &[ToolServerConfig], call: &ToolCall) -> ToolResult;
}

#[derive(Debug, Default)]
pub struct ToolDispatcher {
    next_id: AtomicU64,
}

impl ToolDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke `call` on a single server.
    pub async fn invoke(&self, server: &ToolServerConfig, call: &ToolCall) -> ToolResult {
        match self.run(server, call).await {
            Ok(result) => result,
            Err(e) => {
                warn!(server = %server.id, tool = %call.name, error = %e, "Tool invocation failed");
                ToolResult::failure(e.to_string())
            }
        }
    }

    async fn run(&self, server: &ToolServerConfig, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let mut envelopes = Vec::with_capacity(2);
        if server.initialize {
            envelopes.push(JsonRpcRequest::initialize(self.allocate_id()));
        }
        let call_id = self.allocate_id();
        envelopes.push(JsonRpcRequest::tools_call(call_id, call));

        let mut command = Command::new(&server.command);
        command
            .args(&server.args)
            .envs(&server.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Held until the child exits; the file is removed on drop.
        let mut _request_file = None;
        let mut stdin_payload = None;

        match server.transport {
            RequestTransport::Arguments => {
                command
                    .arg("--tool")
                    .arg(&call.name)
                    .arg("--args")
                    .arg(call.arguments_json().to_string())
                    .stdin(Stdio::null());
            }
            RequestTransport::Stdin => {
                stdin_payload = Some(encode_ndjson(&envelopes)?);
                command.stdin(Stdio::piped());
            }
            RequestTransport::TempFile => {
                let payload = encode_ndjson(&envelopes)?;
                let mut file = tempfile::Builder::new()
                    .prefix("tauti-request-")
                    .suffix(".jsonl")
                    .tempfile()
                    .map_err(|e| ToolError::RequestIo(e.to_string()))?;
                file.write_all(payload.as_bytes())
                    .and_then(|_| file.flush())
                    .map_err(|e| ToolError::RequestIo(e.to_string()))?;
                command.arg("--request").arg(file.path()).stdin(Stdio::null());
                _request_file = Some(file);
            }
        }

        debug!(
            server = %server.id,
            tool = %call.name,
            transport = ?server.transport,
            "Spawning tool server"
        );

        let mut child = command.spawn().map_err(|e| ToolError::SpawnFailed {
            server: server.id.clone(),
            reason: e.to_string(),
        })?;

        // The request write shares the timeout with the wait: a server that
        // never reads stdin must not stall the call.
        let stdin = child.stdin.take();
        let exchange = async move {
            let write = async move {
                if let Some(payload) = stdin_payload
                    && let Some(mut stdin) = stdin
                {
                    // A server that exits without reading its input is not an error here.
                    if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                        debug!(server = %server.id, error = %e, "Tool server closed stdin early");
                    }
                }
            };
            let ((), output) = tokio::join!(write, child.wait_with_output());
            output
        };

        let timeout = Duration::from_secs(server.timeout_secs);
        let output = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ToolError::Timeout {
                server: server.id.clone(),
                timeout_secs: server.timeout_secs,
            })?
            .map_err(|e| ToolError::RequestIo(e.to_string()))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(classify_stdout(&stdout, call_id));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let error = if !stderr.is_empty() {
            stderr.to_string()
        } else {
            match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            }
        };
        debug!(server = %server.id, tool = %call.name, error = %error, "Tool server exited with failure");
        Ok(ToolResult::failure(error))
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl ToolInvoker for ToolDispatcher {
    /// Try enabled servers in order; first success wins, otherwise the last
    /// failure is returned.
    async fn dispatch(&self, servers: &[ToolServerConfig], call: &ToolCall) -> ToolResult {
        let enabled: Vec<&ToolServerConfig> = servers.iter().filter(|s| s.enabled).collect();
        let mut last = ToolResult::failure("no enabled tool servers");

        for (i, server) in enabled.iter().enumerate() {
            info!(
                server = %server.id,
                tool = %call.name,
                attempt = i + 1,
                total = enabled.len(),
                "Dispatch: trying tool server"
            );

            let result = self.invoke(server, call).await;
            if result.is_success() {
                return result;
            }

            warn!(
                server = %server.id,
                tool = %call.name,
                error = result.error().unwrap_or_default(),
                "Dispatch: tool server failed, trying next"
            );
            last = result;
        }

        last
    }
}
