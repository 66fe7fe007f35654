//! Minimal MCP stdio server used as the peer in integration tests
//!
//! Tools:
//! - `echo`: returns its arguments as compact JSON text
//! - `fail`: returns a tool error
//! - `sleep`: waits `ms` milliseconds
//! - `pid`: returns this process's id

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct EchoParams {
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct FailParams {
    #[schemars(description = "Error text to report")]
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SleepParams {
    #[schemars(description = "Milliseconds to wait")]
    ms: u64,
}

#[derive(Clone)]
struct EchoPeer {
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl EchoPeer {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Return the arguments as compact JSON")]
    async fn echo(
        &self,
        Parameters(params): Parameters<EchoParams>,
    ) -> Result<CallToolResult, McpError> {
        let text = serde_json::to_string(&params.fields)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(description = "Report a tool error")]
    async fn fail(
        &self,
        Parameters(params): Parameters<FailParams>,
    ) -> Result<CallToolResult, McpError> {
        let message = params.message.unwrap_or_else(|| "requested failure".to_string());
        Ok(CallToolResult::error(vec![Content::text(message)]))
    }

    #[tool(description = "Wait for the given number of milliseconds")]
    async fn sleep(
        &self,
        Parameters(params): Parameters<SleepParams>,
    ) -> Result<CallToolResult, McpError> {
        tokio::time::sleep(std::time::Duration::from_millis(params.ms)).await;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "slept {}ms",
            params.ms
        ))]))
    }

    #[tool(description = "Return the server's process id")]
    async fn pid(&self) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(
            std::process::id().to_string(),
        )]))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for EchoPeer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("Echo server for exercising the warmd daemon.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let service = EchoPeer::new().serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
