//! Control socket protocol
//!
//! One document each way per connection. The client writes
//! `{"tool": ..., "args": {...}}` and shuts down its write side; the daemon
//! answers `{"text": ..., "isError": ...}` and closes. `{"ping": true}` is
//! answered without reaching the peer and doubles as the readiness check.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DaemonError, Result};

/// Text returned for a ping
pub const PONG: &str = "pong";

/// Request from client to daemon
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonRequest {
    /// Readiness check that never touches the peer
    Ping,
    /// Run a tool on the peer
    CallTool { tool: String, args: Value },
}

#[derive(Serialize, Deserialize)]
struct CallToolDocument {
    tool: String,
    #[serde(default = "empty_object")]
    args: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl DaemonRequest {
    pub fn call(tool: impl Into<String>, args: Value) -> Self {
        Self::CallTool {
            tool: tool.into(),
            args,
        }
    }

    /// Decode a request document
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| DaemonError::InvalidRequest(e.to_string()))?;

        if value.get("ping").and_then(Value::as_bool) == Some(true) {
            return Ok(Self::Ping);
        }

        let doc: CallToolDocument = serde_json::from_value(value)
            .map_err(|e| DaemonError::InvalidRequest(e.to_string()))?;
        if !doc.args.is_object() {
            return Err(DaemonError::InvalidRequest(
                "`args` must be a JSON object".to_string(),
            ));
        }
        Ok(Self::CallTool {
            tool: doc.tool,
            args: doc.args,
        })
    }

    /// Encode as a request document
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Ping => serde_json::to_vec(&serde_json::json!({"ping": true}))?,
            Self::CallTool { tool, args } => serde_json::to_vec(&CallToolDocument {
                tool: tool.clone(),
                args: args.clone(),
            })?,
        };
        Ok(bytes)
    }
}

/// Response from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// Error response for a failure inside the daemon itself
    pub fn daemon_error(err: &DaemonError) -> Self {
        Self::error(format!("Daemon error: {}", err))
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        if self.is_error {
            1
        } else {
            0
        }
    }
}
