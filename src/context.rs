//! Application context providing dependency injection root.

use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::embedder::{EmbedderClient, OllamaEmbedder};
use crate::error::AppError;
use crate::graph::{EphemeralStore, GraphStore, Neo4jStore};
use crate::llm::{LlmClient, OllamaClient};
use crate::services::GroupLocks;
use crate::throttle::Throttle;

/// Root application context for dependency injection.
///
/// Services resolve their handles from it through
/// [`FromRef`](crate::di::FromRef); every field is cheap to clone.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    /// Episode, entity and fact storage.
    pub store: Arc<dyn GraphStore>,
    /// Chat model used for extraction.
    pub llm: Arc<dyn LlmClient>,
    pub embedder: Arc<dyn EmbedderClient>,
    /// Serializes entity resolution within a group across tool calls.
    pub group_locks: GroupLocks,
}

impl Context {
    /// Creates a context from already-built dependencies.
    pub fn new(
        config: Config,
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbedderClient>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            llm,
            embedder,
            group_locks: GroupLocks::default(),
        }
    }

    /// Connect the configured store and build the Ollama clients, which
    /// share one [`Throttle`].
    pub async fn from_config(config: Config) -> Result<Self, AppError> {
        let throttle = Throttle::new(config.throttle.max_in_flight);

        let store: Arc<dyn GraphStore> = match config.graph.backend {
            StoreBackend::Neo4j => {
                tracing::info!(uri = %config.neo4j.uri, "Connecting to Neo4j");
                Arc::new(Neo4jStore::connect(&config.neo4j).await?)
            }
            StoreBackend::Ephemeral => {
                tracing::warn!("Using the in-process store; memories are lost on exit");
                Arc::new(EphemeralStore::new())
            }
        };

        let llm = OllamaClient::new(&config.llm, throttle.clone())?;
        let embedder = OllamaEmbedder::new(&config.embedder, throttle.clone())?;

        Ok(Self::new(config, store, Arc::new(llm), Arc::new(embedder)))
    }
}
