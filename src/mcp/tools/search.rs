//! Hybrid search tools over entities and facts.

use rmcp::{
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::{self, JsonSchema},
    tool, tool_router, ErrorData as McpError,
};
use serde::{Deserialize, Serialize};

use crate::mcp::protocol::{truncate, Response, ToolCall};
use crate::mcp::server::McpServer;
use crate::models::{format_timestamp, EntityEdge, EntityNode, Scored};
use crate::services::SearchService;

const TEXT_PREVIEW: usize = 200;

fn default_max() -> i64 {
    10
}

// ============================================================================
// Parameter Types
// ============================================================================

/// Parameters for search_memory_nodes tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchNodesParams {
    /// Natural language search query.
    pub query: String,
    /// Maximum number of nodes (default: 10, max: 50).
    #[serde(default = "default_max")]
    pub max_nodes: i64,
    /// Restrict to these groups; empty searches all groups.
    #[serde(default)]
    pub group_ids: Vec<String>,
}

/// Parameters for search_memory_facts tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFactsParams {
    /// Natural language search query.
    pub query: String,
    /// Maximum number of facts (default: 10, max: 50).
    #[serde(default = "default_max")]
    pub max_facts: i64,
    /// Restrict to these groups; empty searches all groups.
    #[serde(default)]
    pub group_ids: Vec<String>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub name: String,
    pub uuid: String,
    pub created_at: String,
    pub summary: String,
    pub group_id: String,
    pub labels: Vec<String>,
    pub score: f32,
}

impl From<Scored<EntityNode>> for NodeResponse {
    fn from(hit: Scored<EntityNode>) -> Self {
        let node = hit.item;
        Self {
            created_at: format_timestamp(&node.created_at),
            summary: truncate(&node.summary, TEXT_PREVIEW),
            name: node.name,
            uuid: node.uuid,
            group_id: node.group_id,
            labels: node.labels,
            score: hit.score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FactResponse {
    pub relation_type: String,
    pub uuid: String,
    pub created_at: String,
    pub fact: String,
    pub group_id: String,
    pub source_node_uuid: String,
    pub target_node_uuid: String,
    pub score: f32,
}

impl From<Scored<EntityEdge>> for FactResponse {
    fn from(hit: Scored<EntityEdge>) -> Self {
        let edge = hit.item;
        Self {
            created_at: format_timestamp(&edge.created_at),
            fact: truncate(&edge.fact, TEXT_PREVIEW),
            relation_type: edge.name,
            uuid: edge.uuid,
            group_id: edge.group_id,
            source_node_uuid: edge.source_node_uuid,
            target_node_uuid: edge.target_node_uuid,
            score: hit.score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchNodesResult {
    pub message: String,
    pub nodes: Vec<NodeResponse>,
    pub count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct SearchFactsResult {
    pub message: String,
    pub facts: Vec<FactResponse>,
    pub count: usize,
    pub elapsed_ms: u64,
}

// ============================================================================
// Tool Router
// ============================================================================

#[tool_router(router = search_tools, vis = "pub(crate)")]
impl McpServer {
    /// Hybrid (semantic + keyword) search over entities.
    #[tool(
        description = "Search memory for entities relevant to a query. Combines embedding similarity and keyword matching."
    )]
    pub async fn search_memory_nodes(
        &self,
        Parameters(params): Parameters<SearchNodesParams>,
    ) -> Result<CallToolResult, McpError> {
        let call = ToolCall::start("search_memory_nodes");
        tracing::debug!(query = %truncate(&params.query, 50), "search_memory_nodes input");

        let service = self.resolve::<SearchService>();
        let result = service
            .search_nodes(&params.query, params.max_nodes, &params.group_ids)
            .await;
        let elapsed_ms = call.elapsed_ms();
        let hits = call.finish(result)?;

        Response(SearchNodesResult {
            message: format!("Found {} relevant nodes", hits.len()),
            count: hits.len(),
            nodes: hits.into_iter().map(Into::into).collect(),
            elapsed_ms,
        })
        .into()
    }

    /// Hybrid (semantic + keyword) search over facts.
    #[tool(
        description = "Search memory for facts (relationships between entities) relevant to a query."
    )]
    pub async fn search_memory_facts(
        &self,
        Parameters(params): Parameters<SearchFactsParams>,
    ) -> Result<CallToolResult, McpError> {
        let call = ToolCall::start("search_memory_facts");
        tracing::debug!(query = %truncate(&params.query, 50), "search_memory_facts input");

        let service = self.resolve::<SearchService>();
        let result = service
            .search_facts(&params.query, params.max_facts, &params.group_ids)
            .await;
        let elapsed_ms = call.elapsed_ms();
        let hits = call.finish(result)?;

        Response(SearchFactsResult {
            message: format!("Found {} relevant facts", hits.len()),
            count: hits.len(),
            facts: hits.into_iter().map(Into::into).collect(),
            elapsed_ms,
        })
        .into()
    }
}
