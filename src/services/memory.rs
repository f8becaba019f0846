//! Episode ingestion, listing and deletion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::Config;
use crate::context::Context;
use crate::di::FromRef;
use crate::embedder::EmbedderClient;
use crate::error::AppError;
use crate::graph::{ClearReport, GraphStore};
use crate::llm::prompts::EpisodeText;
use crate::llm::schema::entity_type_label;
use crate::models::{format_timestamp, parse_timestamp, EntityEdge, EntityNode, Episode};
use crate::services::extraction::{Extraction, ExtractionService, ExtractionStatus};

/// Input for [`MemoryService::add_memory`].
#[derive(Debug, Clone, Default)]
pub struct NewEpisode {
    pub name: String,
    pub body: String,
    /// Falls back to `memory.default_group_id` when empty.
    pub group_id: Option<String>,
    pub source_description: Option<String>,
    /// RFC 3339; defaults to now.
    pub reference_time: Option<String>,
    pub skip_extraction: bool,
}

/// What happened to one episode.
#[derive(Debug, Clone, Serialize)]
pub struct AddMemoryResult {
    pub episode_uuid: String,
    pub group_id: String,
    /// Entities linked to the episode, new and reused.
    pub entities: usize,
    /// Of `entities`, how many already existed in the group.
    pub entities_reused: usize,
    pub facts: usize,
    /// Records the model produced that could not be used.
    pub dropped: usize,
    pub extraction: ExtractionStatus,
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

const DEFAULT_SOURCE_DESCRIPTION: &str = "MCP Server";

/// One lock per group, held from the existing-entity lookup until the
/// episode's entities and facts are saved.
///
/// Without it two episodes in the same group can both miss an entity and
/// both create it.
#[derive(Clone, Default)]
pub struct GroupLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl GroupLocks {
    pub async fn lock(&self, group_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(group_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Stores episodes and turns extraction output into graph nodes and facts.
#[derive(Clone)]
pub struct MemoryService {
    store: Arc<dyn GraphStore>,
    extraction: ExtractionService,
    embedder: Arc<dyn EmbedderClient>,
    config: Arc<Config>,
    locks: GroupLocks,
}

impl FromRef<Context> for MemoryService {
    fn from_ref(ctx: &Context) -> Self {
        Self {
            store: Arc::clone(&ctx.store),
            extraction: ExtractionService::from_ref(ctx),
            embedder: Arc::clone(&ctx.embedder),
            config: Arc::clone(&ctx.config),
            locks: ctx.group_locks.clone(),
        }
    }
}

impl MemoryService {
    /// Store an episode, then extract, embed and persist its entities and facts.
    ///
    /// Only invalid input or a store failure is an error. Model failures
    /// leave the episode stored with fewer (or zero) entities and a warning.
    pub async fn add_memory(&self, input: NewEpisode) -> Result<AddMemoryResult, AppError> {
        let started = Instant::now();

        if input.name.trim().is_empty() {
            return Err(AppError::validation("name", "must not be empty"));
        }
        if input.body.trim().is_empty() {
            return Err(AppError::validation("episode_body", "must not be empty"));
        }
        let group_id = self.resolve_group(input.group_id.as_deref())?;
        let valid_at = match input.reference_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(parse_timestamp(text).ok_or_else(|| {
                AppError::validation("reference_time", format!("'{text}' is not RFC 3339"))
            })?),
        };
        let source_description = input
            .source_description
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SOURCE_DESCRIPTION.to_string());

        let episode = Episode::new(
            input.name,
            input.body,
            group_id.clone(),
            source_description,
            valid_at,
        );
        self.store.save_episode(&episode).await?;
        tracing::debug!(uuid = %episode.uuid, group_id = %group_id, "Episode stored");

        let mut result = AddMemoryResult {
            episode_uuid: episode.uuid.clone(),
            group_id,
            entities: 0,
            entities_reused: 0,
            facts: 0,
            dropped: 0,
            extraction: ExtractionStatus::Skipped,
            warnings: Vec::new(),
            elapsed_ms: 0,
        };

        if input.skip_extraction || !self.config.memory.extract_entities {
            result.elapsed_ms = elapsed_ms(started);
            return Ok(result);
        }

        let reference_time = format_timestamp(&episode.valid_at);
        let text = EpisodeText {
            content: &episode.content,
            source_description: &episode.source_description,
            reference_time: &reference_time,
        };

        match self.extraction.extract(text).await {
            Ok(extraction) => self.persist(&episode, extraction, &mut result).await?,
            Err(e) => {
                tracing::warn!(uuid = %episode.uuid, error = %e, "Extraction failed, episode kept");
                result.extraction = ExtractionStatus::Failed;
                result.warnings.push(format!("extraction failed: {e}"));
            }
        }

        result.elapsed_ms = elapsed_ms(started);
        Ok(result)
    }

    async fn persist(
        &self,
        episode: &Episode,
        extraction: Extraction,
        result: &mut AddMemoryResult,
    ) -> Result<(), AppError> {
        result.extraction = extraction.status;
        result.dropped = extraction.dropped;
        result.warnings.extend(extraction.warnings);

        if extraction.entities.is_empty() {
            return Ok(());
        }

        let _group = self.locks.lock(&episode.group_id).await;
        let existing = if self.config.memory.deduplicate {
            let names: Vec<String> = extraction.entities.iter().map(|e| e.name.clone()).collect();
            self.store
                .find_entities_by_name(&episode.group_id, &names)
                .await?
        } else {
            Vec::new()
        };
        let mut by_key: HashMap<String, EntityNode> = HashMap::new();
        for node in existing {
            // Oldest first from the store, so the first one wins.
            by_key.entry(node.dedupe_key()).or_insert(node);
        }

        let mut nodes = Vec::with_capacity(extraction.entities.len());
        for entity in extraction.entities {
            let candidate = EntityNode::new(
                entity.name,
                episode.group_id.clone(),
                entity.summary,
                entity_type_label(entity.entity_type_id),
            );
            match by_key.remove(&candidate.dedupe_key()) {
                Some(mut node) => {
                    if node.summary.is_empty() {
                        node.summary = candidate.summary;
                    }
                    result.entities_reused += 1;
                    nodes.push(node);
                }
                None => nodes.push(candidate),
            }
        }

        let pending: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].name_embedding.is_none())
            .collect();
        let texts: Vec<String> = pending.iter().map(|&i| nodes[i].name.clone()).collect();
        let mut failed = 0;
        for (i, embedding) in pending.into_iter().zip(self.embedder.embed_batch(&texts).await) {
            match embedding {
                Ok(vector) => nodes[i].name_embedding = Some(vector),
                Err(e) => {
                    tracing::warn!(entity = %nodes[i].name, error = %e, "Entity stored without embedding");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            result
                .warnings
                .push(format!("{failed} entity embedding(s) failed"));
        }

        self.store.save_entities(&episode.uuid, &nodes).await?;
        result.entities = nodes.len();

        let mut facts: Vec<EntityEdge> = extraction
            .facts
            .into_iter()
            .map(|f| {
                EntityEdge::new(
                    nodes[f.source].uuid.clone(),
                    nodes[f.target].uuid.clone(),
                    f.relation,
                    f.fact,
                    episode.group_id.clone(),
                    episode.uuid.clone(),
                    episode.valid_at,
                )
            })
            .collect();
        if facts.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = facts.iter().map(|f| f.fact.clone()).collect();
        let mut failed = 0;
        for (fact, embedding) in facts.iter_mut().zip(self.embedder.embed_batch(&texts).await) {
            match embedding {
                Ok(vector) => fact.fact_embedding = Some(vector),
                Err(e) => {
                    tracing::warn!(fact = %fact.fact, error = %e, "Fact stored without embedding");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            result.warnings.push(format!("{failed} fact embedding(s) failed"));
        }

        self.store.save_facts(&facts).await?;
        result.facts = facts.len();
        Ok(())
    }

    /// Most recent episodes, newest first.
    pub async fn episodes(
        &self,
        group_id: Option<&str>,
        last_n: i64,
    ) -> Result<Vec<Episode>, AppError> {
        let limit = self.limit("last_n", last_n)?;
        let group_id = match group_id.map(str::trim) {
            None | Some("") => None,
            Some(group) => {
                validate_group_id(group)?;
                Some(group)
            }
        };
        self.store.recent_episodes(group_id, limit).await
    }

    /// Delete everything in `group_ids`, or the whole graph when empty.
    pub async fn clear(&self, group_ids: &[String]) -> Result<ClearReport, AppError> {
        for group in group_ids {
            validate_group_id(group)?;
        }
        let report = self.store.clear(group_ids).await?;
        tracing::warn!(
            groups = ?group_ids,
            episodes = report.episodes,
            entities = report.entities,
            facts = report.facts,
            "Graph cleared"
        );
        Ok(report)
    }

    fn resolve_group(&self, group_id: Option<&str>) -> Result<String, AppError> {
        match group_id.map(str::trim) {
            None | Some("") => Ok(self.config.memory.default_group_id.clone()),
            Some(group) => {
                validate_group_id(group)?;
                Ok(group.to_string())
            }
        }
    }

    fn limit(&self, field: &'static str, requested: i64) -> Result<usize, AppError> {
        positive_limit(field, requested, self.config.search.max_results)
    }
}

/// Letters, digits, `-` and `_` only.
pub fn validate_group_id(group_id: &str) -> Result<(), AppError> {
    if group_id.is_empty() {
        return Err(AppError::validation("group_id", "must not be empty"));
    }
    if let Some(c) = group_id
        .chars()
        .find(|c| !(c.is_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(AppError::validation(
            "group_id",
            format!("'{group_id}' contains '{c}'; use letters, digits, '-' or '_'"),
        ));
    }
    Ok(())
}

/// A requested result count, which must be positive, capped at `max`.
pub fn positive_limit(field: &'static str, requested: i64, max: usize) -> Result<usize, AppError> {
    if requested <= 0 {
        return Err(AppError::validation(
            field,
            format!("must be greater than 0, got {requested}"),
        ));
    }
    Ok(usize::try_from(requested).map_or(max, |n| n.min(max)))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
