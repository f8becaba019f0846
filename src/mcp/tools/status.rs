//! Connection test tool.

use rmcp::{model::CallToolResult, tool, tool_router, ErrorData as McpError};
use serde::Serialize;

use crate::mcp::protocol::{Response, ToolCall};
use crate::mcp::server::McpServer;
use crate::services::{ConnectionReport, StatusService};

#[derive(Debug, Serialize)]
pub struct TestConnectionResult {
    pub message: String,
    #[serde(flatten)]
    pub report: ConnectionReport,
}

#[tool_router(router = status_tools, vis = "pub(crate)")]
impl McpServer {
    /// Probe the graph store, the chat model and the embedding model.
    #[tool(
        description = "Test connectivity to Neo4j, the Ollama chat model and the embedding model. Reports a status per component."
    )]
    pub async fn test_connection(&self) -> Result<CallToolResult, McpError> {
        let call = ToolCall::start("test_connection");

        let report = self.resolve::<StatusService>().test_connection().await;
        let message = if report.all_ok() {
            "All components reachable"
        } else {
            "Some components are unavailable"
        };
        call.finish(Ok(()))?;

        Response(TestConnectionResult {
            message: message.to_string(),
            report,
        })
        .into()
    }
}
