//! Storage abstraction for the memory graph.
//!
//! [`GraphStore`] is the narrow set of reads and writes the services need.
//! Ranking happens in the services. Backends hand out bounded candidate
//! sets chosen from the whole graph by [`CandidateQuery`]: the nearest
//! records by embedding plus the records containing a query term.
//!
//! # Backends
//!
//! | Backend | Module | Persistence |
//! |---------|--------|-------------|
//! | Neo4j over Bolt | [`backends::neo4j`] | durable |
//! | In-process | [`backends::ephemeral`] | process lifetime |

pub mod backends;
pub mod schema;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::AppError;
use crate::models::{EntityEdge, EntityNode, Episode};

pub use backends::ephemeral::EphemeralStore;
pub use backends::neo4j::Neo4jStore;

/// Counts removed by [`GraphStore::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub episodes: u64,
    pub entities: u64,
    pub facts: u64,
}

/// Outcome of [`GraphStore::build_indices`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    pub applied: usize,
    /// Statements the server rejected, with the reason.
    pub skipped: Vec<String>,
}

/// Selects search candidates.
///
/// With neither a vector nor terms, the newest `limit` records are returned.
#[derive(Debug, Clone, Copy)]
pub struct CandidateQuery<'a> {
    /// Up to `limit` records nearest to this vector.
    pub vector: Option<&'a [f32]>,
    /// Lowercased terms; up to `limit` records containing any of them.
    pub terms: &'a [String],
    pub limit: usize,
}

impl<'a> CandidateQuery<'a> {
    pub fn new(vector: &'a [f32], terms: &'a [String], limit: usize) -> Self {
        Self {
            vector: Some(vector),
            terms,
            limit,
        }
    }

    /// The newest `limit` records.
    pub fn recent(limit: usize) -> Self {
        Self {
            vector: None,
            terms: &[],
            limit,
        }
    }

    pub(crate) fn is_recent(&self) -> bool {
        self.vector.is_none() && self.terms.is_empty()
    }

    /// Whether lowercased `text` contains any term.
    pub(crate) fn matches_terms(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.terms.iter().any(|t| text.contains(t.as_str()))
    }
}

/// Reads and writes of episodes, entities and facts.
///
/// Group filters given as an empty slice match every group.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Short backend name for status output.
    fn backend(&self) -> &'static str;

    /// Cheap round trip proving the store is reachable.
    async fn ping(&self) -> Result<(), AppError>;

    /// Create constraints and indexes. Idempotent.
    async fn build_indices(&self, dimensions: usize) -> Result<SchemaReport, AppError>;

    async fn save_episode(&self, episode: &Episode) -> Result<(), AppError>;

    /// Entities in `group_id` whose normalized name is in `names`.
    async fn find_entities_by_name(
        &self,
        group_id: &str,
        names: &[String],
    ) -> Result<Vec<EntityNode>, AppError>;

    /// Upsert entities by uuid and link each to the episode with `MENTIONS`.
    async fn save_entities(
        &self,
        episode_uuid: &str,
        entities: &[EntityNode],
    ) -> Result<(), AppError>;

    /// Insert facts. Both endpoints must already exist.
    async fn save_facts(&self, facts: &[EntityEdge]) -> Result<(), AppError>;

    /// Entities selected by `query`, each at most once.
    async fn entity_candidates(
        &self,
        group_ids: &[String],
        query: &CandidateQuery<'_>,
    ) -> Result<Vec<EntityNode>, AppError>;

    /// Facts selected by `query`, each at most once.
    async fn fact_candidates(
        &self,
        group_ids: &[String],
        query: &CandidateQuery<'_>,
    ) -> Result<Vec<EntityEdge>, AppError>;

    /// Up to `limit` episodes, newest first. `None` matches every group.
    async fn recent_episodes(
        &self,
        group_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Episode>, AppError>;

    /// Delete episodes, entities and facts in `group_ids` (all when empty).
    async fn clear(&self, group_ids: &[String]) -> Result<ClearReport, AppError>;
}

/// Whether `group_id` passes a group filter.
pub(crate) fn in_groups(group_ids: &[String], group_id: &str) -> bool {
    group_ids.is_empty() || group_ids.iter().any(|g| g == group_id)
}
