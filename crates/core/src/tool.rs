//! Tool call types: what the model asks for and what a tool server returns.
//!
//! Tools are external processes (see `tauti-tools`). The core only defines
//! the values flowing in and out of them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ToolError;

/// A structured value passed to or returned from a tool.
///
/// Closed union over the JSON data model, so serialization is total: every
/// `ToolValue` renders to valid JSON and every JSON document converts back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum ToolValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<ToolValue>),
    Object(BTreeMap<String, ToolValue>),
}

impl ToolValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render as compact JSON text.
    pub fn to_json_string(&self) -> String {
        serde_json::Value::from(self.clone()).to_string()
    }
}

impl From<serde_json::Value> for ToolValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<ToolValue> for serde_json::Value {
    fn from(value: ToolValue) -> Self {
        match value {
            ToolValue::Null => Self::Null,
            ToolValue::Bool(b) => Self::Bool(b),
            ToolValue::Number(n) => Self::Number(n),
            ToolValue::String(s) => Self::String(s),
            ToolValue::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            ToolValue::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for ToolValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ToolValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool to execute
    pub name: String,

    /// Named arguments
    #[serde(default)]
    pub arguments: BTreeMap<String, ToolValue>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: BTreeMap<String, ToolValue>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from a JSON payload, which must be an object.
    pub fn from_json(name: impl Into<String>, payload: serde_json::Value) -> Result<Self, ToolError> {
        match ToolValue::from(payload) {
            ToolValue::Object(arguments) => Ok(Self::new(name, arguments)),
            other => Err(ToolError::InvalidArguments(format!(
                "expected a JSON object, got {}",
                other.to_json_string()
            ))),
        }
    }

    /// The argument map as a JSON object.
    pub fn arguments_json(&self) -> serde_json::Value {
        serde_json::Value::from(ToolValue::Object(self.arguments.clone()))
    }
}

/// The outcome of a tool execution. Success and error are mutually exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success { result: ToolValue },
    Failure { error: String },
}

impl ToolResult {
    pub fn success(result: impl Into<ToolValue>) -> Self {
        Self::Success {
            result: result.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn result(&self) -> Option<&ToolValue> {
        match self {
            Self::Success { result } => Some(result),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}
