//! Control socket server
//!
//! Each connection lives in its own task: read the whole request, run it,
//! write one response, close. A connection that reached the point of
//! running a request always gets a decodable reply, even on failure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use super::protocol::{DaemonRequest, ToolOutput, PONG};
use crate::error::Result;
use crate::peer::ToolCaller;

/// Accepts client connections and dispatches them to a tool caller
pub struct SocketServer {
    caller: Arc<dyn ToolCaller>,
    read_timeout: Duration,
}

impl SocketServer {
    pub fn new(caller: Arc<dyn ToolCaller>, read_timeout: Duration) -> Self {
        Self {
            caller,
            read_timeout,
        }
    }

    /// Accept connections until `shutdown` resolves, returning its output
    pub async fn serve<F, T>(&self, listener: UnixListener, shutdown: F) -> T
    where
        F: Future<Output = T>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                reason = &mut shutdown => return reason,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let caller = self.caller.clone();
                        let read_timeout = self.read_timeout;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, caller, read_timeout).await {
                                tracing::debug!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                },
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    caller: Arc<dyn ToolCaller>,
    read_timeout: Duration,
) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let mut raw = Vec::new();
    match tokio::time::timeout(read_timeout, reader.read_to_end(&mut raw)).await {
        Ok(read) => {
            read?;
        }
        Err(_) => {
            tracing::warn!(
                "Client did not finish its request within {:?}, closing",
                read_timeout
            );
            return Ok(());
        }
    }

    let response = match DaemonRequest::from_slice(&raw) {
        Ok(DaemonRequest::Ping) => ToolOutput::success(PONG),
        Ok(DaemonRequest::CallTool { tool, args }) => {
            match caller.call_tool(&tool, args).await {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!("Tool '{}' failed: {}", tool, e);
                    ToolOutput::daemon_error(&e)
                }
            }
        }
        Err(e) => {
            tracing::warn!("Rejected request: {}", e);
            ToolOutput::daemon_error(&e)
        }
    };

    writer.write_all(&serde_json::to_vec(&response)?).await?;
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DaemonError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Echoes arguments back as text; `sleep` blocks for a while
    struct EchoCaller;

    #[async_trait]
    impl ToolCaller for EchoCaller {
        async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
            match name {
                "echo" => Ok(ToolOutput::success(arguments.to_string())),
                "sleep" => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(ToolOutput::success("slept"))
                }
                "timeout" => Err(DaemonError::Timeout {
                    method: "tools/call".to_string(),
                    timeout: Duration::from_secs(1),
                }),
                other => Ok(ToolOutput::error(format!("unknown tool: {}", other))),
            }
        }
    }

    async fn start_server(read_timeout: Duration) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = SocketServer::new(Arc::new(EchoCaller), read_timeout);
        tokio::spawn(async move { server.serve(listener, std::future::pending::<()>()).await });
        (dir, socket)
    }

    async fn exchange(socket: &std::path::Path, request: &[u8]) -> Vec<u8> {
        let mut stream = UnixStream::connect(socket).await.unwrap();
        stream.write_all(request).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (_dir, socket) = start_server(Duration::from_secs(5)).await;
        let raw = exchange(&socket, br#"{"tool": "echo", "args": {"x": 1}}"#).await;
        let out: ToolOutput = serde_json::from_slice(&raw).unwrap();
        assert_eq!(out, ToolOutput::success(r#"{"x":1}"#));
    }

    #[tokio::test]
    async fn test_invalid_request_gets_error_response() {
        let (_dir, socket) = start_server(Duration::from_secs(5)).await;
        let raw = exchange(&socket, br#"{"args": {}}"#).await;
        let value: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["isError"], true);
        assert!(value["text"].as_str().unwrap().starts_with("Daemon error:"));
    }

    #[tokio::test]
    async fn test_call_failure_gets_error_response() {
        let (_dir, socket) = start_server(Duration::from_secs(5)).await;
        let raw = exchange(&socket, br#"{"tool": "timeout", "args": {}}"#).await;
        let out: ToolOutput = serde_json::from_slice(&raw).unwrap();
        assert!(out.is_error);
        assert!(out.text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_stalled_client_is_dropped_without_response() {
        let (_dir, socket) = start_server(Duration::from_millis(100)).await;

        // Connect but never shut down the write side
        let mut stream = UnixStream::connect(&socket).await.unwrap();
        stream.write_all(br#"{"tool": "echo""#).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_accept() {
        let (_dir, socket) = start_server(Duration::from_secs(5)).await;

        let slow_socket = socket.clone();
        let slow = tokio::spawn(async move {
            exchange(&slow_socket, br#"{"tool": "sleep", "args": {}}"#).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let raw = exchange(&socket, br#"{"ping": true}"#).await;
        assert!(started.elapsed() < Duration::from_millis(400));
        let out: ToolOutput = serde_json::from_slice(&raw).unwrap();
        assert_eq!(out.text, PONG);

        let slow: ToolOutput = serde_json::from_slice(&slow.await.unwrap()).unwrap();
        assert_eq!(slow.text, "slept");
    }

    #[tokio::test]
    async fn test_serve_returns_shutdown_reason() {
        let dir = tempfile::tempdir().unwrap();
        let listener = UnixListener::bind(dir.path().join("s.sock")).unwrap();
        let server = SocketServer::new(Arc::new(EchoCaller), Duration::from_secs(5));
        assert_eq!(server.serve(listener, async { "peer exited" }).await, "peer exited");
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (_dir, socket) = start_server(Duration::from_secs(5)).await;
        let raw = exchange(&socket, &DaemonRequest::Ping.to_vec().unwrap()).await;
        assert_eq!(
            serde_json::from_slice::<Value>(&raw).unwrap(),
            json!({"text": "pong", "isError": false})
        );
    }
}
