//! [`GraphStore`](crate::graph::GraphStore) implementations.
//!
//! | Backend | Module | Status |
//! |---------|--------|--------|
//! | Neo4j (Bolt, `neo4rs`) | [`neo4j`] | Default |
//! | In-process (`tokio::sync::RwLock`) | [`ephemeral`] | Tests, offline use |

pub mod ephemeral;
pub mod neo4j;
