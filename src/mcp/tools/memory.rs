//! Episode tools: add, list and clear.

use rmcp::{
    handler::server::wrapper::Parameters,
    model::CallToolResult,
    schemars::{self, JsonSchema},
    tool, tool_router, ErrorData as McpError,
};
use serde::{Deserialize, Serialize};

use crate::mcp::protocol::{truncate, Response, ToolCall};
use crate::mcp::server::McpServer;
use crate::models::{format_timestamp, Episode};
use crate::services::{AddMemoryResult, MemoryService, NewEpisode};

const CONTENT_PREVIEW: usize = 500;

// ============================================================================
// Parameter Types
// ============================================================================

/// Parameters for add_memory tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddMemoryParams {
    /// Short name for the episode.
    pub name: String,
    /// Text to remember.
    pub episode_body: String,
    /// Group to store the episode in (default: server default group).
    #[serde(default)]
    pub group_id: Option<String>,
    /// Where the text came from (default: "MCP Server").
    #[serde(default)]
    pub source_description: Option<String>,
    /// When the episode happened, RFC 3339 (default: now).
    #[serde(default)]
    pub reference_time: Option<String>,
    /// Store the episode without extracting entities.
    #[serde(default)]
    pub skip_extraction: bool,
}

/// Parameters for get_episodes tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetEpisodesParams {
    /// Number of most recent episodes (default: 10, max: 50).
    #[serde(default = "default_last_n")]
    pub last_n: i64,
    /// Only episodes in this group; empty for all groups.
    #[serde(default)]
    pub group_id: String,
}

fn default_last_n() -> i64 {
    10
}

/// Parameters for clear_graph tool.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ClearGraphParams {
    /// Groups to clear; empty clears the whole graph.
    #[serde(default)]
    pub group_ids: Vec<String>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct AddMemoryResponse {
    pub message: String,
    #[serde(flatten)]
    pub result: AddMemoryResult,
}

/// Episode summary with content cut to a preview.
#[derive(Debug, Serialize)]
pub struct EpisodeResponse {
    pub name: String,
    pub content: String,
    pub uuid: String,
    pub group_id: String,
    pub source_description: String,
    pub created_at: String,
    pub valid_at: String,
}

impl From<Episode> for EpisodeResponse {
    fn from(e: Episode) -> Self {
        Self {
            content: truncate(&e.content, CONTENT_PREVIEW),
            created_at: format_timestamp(&e.created_at),
            valid_at: format_timestamp(&e.valid_at),
            name: e.name,
            uuid: e.uuid,
            group_id: e.group_id,
            source_description: e.source_description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GetEpisodesResult {
    pub message: String,
    pub episodes: Vec<EpisodeResponse>,
    pub count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ClearGraphResult {
    pub message: String,
    pub deleted_episodes: u64,
    pub deleted_entities: u64,
    pub deleted_facts: u64,
    pub elapsed_ms: u64,
}

// ============================================================================
// Tool Router
// ============================================================================

#[tool_router(router = memory_tools, vis = "pub(crate)")]
impl McpServer {
    /// Store an episode and extract entities and facts from it.
    #[tool(
        description = "Add an episode to memory. Entities and facts are extracted from episode_body by the local model; extraction problems are reported as warnings and never lose the episode."
    )]
    pub async fn add_memory(
        &self,
        Parameters(params): Parameters<AddMemoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let call = ToolCall::start("add_memory");
        tracing::debug!(name = %truncate(&params.name, 50), "add_memory input");

        let service = self.resolve::<MemoryService>();
        let result = call.finish(
            service
                .add_memory(NewEpisode {
                    name: params.name,
                    body: params.episode_body,
                    group_id: params.group_id,
                    source_description: params.source_description,
                    reference_time: params.reference_time,
                    skip_extraction: params.skip_extraction,
                })
                .await,
        )?;

        Response(AddMemoryResponse {
            message: format!(
                "Episode stored with {} entities and {} facts",
                result.entities, result.facts
            ),
            result,
        })
        .into()
    }

    /// List the most recent episodes.
    #[tool(description = "Get the most recent episodes, newest first, optionally for one group.")]
    pub async fn get_episodes(
        &self,
        Parameters(params): Parameters<GetEpisodesParams>,
    ) -> Result<CallToolResult, McpError> {
        let call = ToolCall::start("get_episodes");

        let service = self.resolve::<MemoryService>();
        let result = service
            .episodes(Some(params.group_id.as_str()), params.last_n)
            .await;
        let elapsed_ms = call.elapsed_ms();
        let episodes = call.finish(result)?;

        Response(GetEpisodesResult {
            message: format!("Found {} episodes", episodes.len()),
            count: episodes.len(),
            episodes: episodes.into_iter().map(Into::into).collect(),
            elapsed_ms,
        })
        .into()
    }

    /// Delete episodes, entities and facts.
    #[tool(
        description = "DESTRUCTIVE AND IRREVERSIBLE: delete all episodes, entities and facts in the given groups, or the whole graph when group_ids is empty. Confirm with the user before calling.",
        annotations(title = "Clear graph", destructive_hint = true)
    )]
    pub async fn clear_graph(
        &self,
        Parameters(params): Parameters<ClearGraphParams>,
    ) -> Result<CallToolResult, McpError> {
        let call = ToolCall::start("clear_graph");

        let service = self.resolve::<MemoryService>();
        let result = service.clear(&params.group_ids).await;
        let elapsed_ms = call.elapsed_ms();
        let report = call.finish(result)?;

        let scope = if params.group_ids.is_empty() {
            "Graph cleared".to_string()
        } else {
            format!("Cleared groups: {}", params.group_ids.join(", "))
        };

        Response(ClearGraphResult {
            message: scope,
            deleted_episodes: report.episodes,
            deleted_entities: report.entities,
            deleted_facts: report.facts,
            elapsed_ms,
        })
        .into()
    }
}
