//! Reachability probes for the store and both model endpoints.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::context::Context;
use crate::di::FromRef;
use crate::embedder::EmbedderClient;
use crate::graph::GraphStore;
use crate::llm::{LlmClient, Message};

const OK: &str = "OK";

/// Per-component status. Each field is `"OK"` or a short error description.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub neo4j: String,
    pub ollama_llm: String,
    pub embedder: String,
    pub backend: &'static str,
    pub llm_model: String,
    pub embedder_model: String,
    pub embedder_dimensions: usize,
    pub elapsed_ms: u64,
}

impl ConnectionReport {
    pub fn all_ok(&self) -> bool {
        [&self.neo4j, &self.ollama_llm, &self.embedder]
            .iter()
            .all(|s| s.as_str() == OK)
    }
}

#[derive(Clone)]
pub struct StatusService {
    store: Arc<dyn GraphStore>,
    llm: Arc<dyn LlmClient>,
    embedder: Arc<dyn EmbedderClient>,
}

impl FromRef<Context> for StatusService {
    fn from_ref(ctx: &Context) -> Self {
        Self::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.llm),
            Arc::clone(&ctx.embedder),
        )
    }
}

impl StatusService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbedderClient>,
    ) -> Self {
        Self {
            store,
            llm,
            embedder,
        }
    }

    /// Probe all three components concurrently. Never fails.
    pub async fn test_connection(&self) -> ConnectionReport {
        let started = Instant::now();

        let (neo4j, ollama_llm, embedder) =
            tokio::join!(self.probe_store(), self.probe_llm(), self.probe_embedder());

        ConnectionReport {
            neo4j,
            ollama_llm,
            embedder,
            backend: self.store.backend(),
            llm_model: self.llm.model().to_string(),
            embedder_model: self.embedder.model().to_string(),
            embedder_dimensions: self.embedder.dimensions(),
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn probe_store(&self) -> String {
        match self.store.ping().await {
            Ok(()) => OK.to_string(),
            Err(e) => failure(&e),
        }
    }

    async fn probe_llm(&self) -> String {
        let messages = [Message::user("What is 1+1? Answer with the number only.")];
        match self.llm.chat(&messages, false).await {
            Ok(reply) if reply.trim().is_empty() => "error: empty response".to_string(),
            Ok(_) => OK.to_string(),
            Err(e) => failure(&e),
        }
    }

    async fn probe_embedder(&self) -> String {
        match self.embedder.embed("connection test").await {
            Ok(_) => OK.to_string(),
            Err(e) => failure(&e),
        }
    }
}

/// `error: <message>`, with the message cut to 100 characters.
fn failure(error: &dyn std::fmt::Display) -> String {
    let message: String = error.to_string().chars().take(100).collect();
    format!("error: {message}")
}
