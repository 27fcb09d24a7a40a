//! External tool servers for Tauti.
//!
//! A tool server is a command spawned once per tool call. The request goes
//! in as a JSON-RPC `tools/call` envelope (or plain `--tool`/`--args`
//! flags); whatever the process prints is classified into a
//! [`tauti_core::tool::ToolResult`].

pub mod dispatcher;
pub mod envelope;

pub use dispatcher::{ToolDispatcher, ToolInvoker};
pub use envelope::{JsonRpcRequest, PROTOCOL_VERSION};
