//! MCP server implementation for the memory graph.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, ServerHandler},
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool_handler,
};

use crate::context::Context;
use crate::di::FromRef;

/// MCP server giving an assistant a persistent knowledge-graph memory.
#[derive(Clone)]
pub struct McpServer {
    pub(crate) ctx: Arc<Context>,
    tool_router: ToolRouter<McpServer>,
}

impl McpServer {
    /// Create a new server over the given context.
    pub fn new(ctx: Context) -> Self {
        tracing::debug!("Initializing MCP server");

        Self {
            ctx: Arc::new(ctx),
            tool_router: Self::tool_router(),
        }
    }

    /// Build the combined tool router from all tool modules.
    fn tool_router() -> ToolRouter<Self> {
        Self::memory_tools() + Self::search_tools() + Self::status_tools()
    }

    /// Resolve a dependency from the context.
    pub fn resolve<T: FromRef<Context>>(&self) -> T {
        T::from_ref(&self.ctx)
    }
}

// ============================================================================
// Server Handler
// ============================================================================

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                r#"ollama-memory - Knowledge-Graph Memory MCP Server

Long-term memory stored as a knowledge graph in Neo4j. Text episodes are
broken into entities and facts by a local Ollama model.

## Concepts

- **Episode**: a piece of text you asked to remember, with a name and time
- **Entity**: a person, organization, technology, concept or place found in episodes
- **Fact**: a relationship between two entities, e.g. "Alice uses Rust"
- **Group**: a namespace (group_id) that keeps memories apart

## Tools

- **add_memory** - Store an episode and extract entities and facts
- **search_memory_nodes** - Find entities relevant to a query
- **search_memory_facts** - Find facts relevant to a query
- **get_episodes** - List recent episodes
- **clear_graph** - Delete memories (irreversible; ask the user first)
- **test_connection** - Check Neo4j and Ollama availability
"#
                .to_string(),
            ),
        }
    }
}
