//! Tool invocation on top of the peer channel
//!
//! The peer is not known to be safe under concurrent tool calls, so every
//! `tools/call` goes through a single gate: at most one is outstanding at a
//! time, whatever number of clients are connected.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::channel::PeerChannel;
use super::message;
use crate::daemon::protocol::ToolOutput;
use crate::error::{DaemonError, Result};

/// Something that can run a named tool with JSON arguments
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput>;
}

/// Serializes tool calls onto one peer
pub struct ToolInvoker {
    channel: Arc<PeerChannel>,
    gate: tokio::sync::Mutex<()>,
}

impl ToolInvoker {
    pub fn new(channel: Arc<PeerChannel>) -> Self {
        Self {
            channel,
            gate: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl ToolCaller for ToolInvoker {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        if !self.channel.is_ready() {
            return Err(DaemonError::NotReady);
        }

        let reply = {
            let _gate = self.gate.lock().await;
            tracing::debug!("Calling tool: {}", name);
            self.channel
                .request(
                    message::METHOD_TOOLS_CALL,
                    Some(message::tools_call_params(name, arguments)),
                )
                .await?
        };

        Ok(normalize_reply(&reply))
    }
}

/// Flatten a `tools/call` reply into text plus the peer's error flag
fn normalize_reply(reply: &Value) -> ToolOutput {
    if let Some(error) = reply.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return ToolOutput::error(text);
    }

    let result = reply.get("result");
    let text = result
        .and_then(|r| r.get("content"))
        .and_then(Value::as_array)
        .map(|content| {
            content
                .iter()
                .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
                .map(|c| c.get("text").and_then(Value::as_str).unwrap_or(""))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    let is_error = result
        .and_then(|r| r.get("isError"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    ToolOutput { text, is_error }
}
