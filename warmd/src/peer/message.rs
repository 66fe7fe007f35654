//! JSON-RPC framing used on the peer's stdio
//!
//! Requests carry `{id, method, params}`, notifications drop the `id`.
//! Everything coming back is kept as a raw `Value`; only the correlation id
//! is looked at by the channel.

use serde::Serialize;
use serde_json::{json, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced during the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Outgoing request or notification
#[derive(Debug, Serialize)]
pub struct OutgoingMessage<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> OutgoingMessage<'a> {
    pub fn request(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params,
        }
    }

    pub fn notification(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params,
        }
    }

    /// Serialize as exactly one newline-terminated line
    pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Correlation id of a reply.
///
/// Messages with a `method` are peer-initiated (requests or notifications)
/// and never count as replies, even when they carry an id.
pub fn reply_id(msg: &Value) -> Option<u64> {
    if msg.get("method").is_some() {
        return None;
    }
    msg.get("id").and_then(Value::as_u64)
}

/// Parameters of the `initialize` request
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "warmd",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Parameters of a `tools/call` request
pub fn tools_call_params(name: &str, arguments: Value) -> Value {
    json!({
        "name": name,
        "arguments": arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let line = OutgoingMessage::request(7, "tools/call", Some(json!({"a": 1})))
            .to_line()
            .unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "tools/call");
        assert_eq!(value["params"]["a"], 1);
    }

    #[test]
    fn test_notification_has_no_id() {
        let line = OutgoingMessage::notification(METHOD_INITIALIZED, None)
            .to_line()
            .unwrap();
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_reply_id() {
        assert_eq!(reply_id(&json!({"id": 3, "result": {}})), Some(3));
        assert_eq!(reply_id(&json!({"method": "notifications/progress"})), None);
        assert_eq!(reply_id(&json!({"id": 3, "method": "roots/list"})), None);
        assert_eq!(reply_id(&json!({"id": "abc", "result": {}})), None);
    }
}
