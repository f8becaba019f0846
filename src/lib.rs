//! ollama-memory - Knowledge-Graph Memory MCP Server
//!
//! Stores text episodes in a Neo4j knowledge graph, extracting entities and
//! facts with a locally hosted Ollama model.

pub mod cli;
pub mod config;
pub mod context;
pub mod di;
pub mod embedder;
pub mod error;
pub mod graph;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod services;
pub mod throttle;

pub use di::FromRef;
