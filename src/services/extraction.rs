//! Two-pass entity and fact extraction from episode text.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::context::Context;
use crate::di::FromRef;
use crate::llm::prompts::{self, EpisodeText};
use crate::llm::{
    generate_structured, ExtractedEdge, ExtractedEntity, ExtractionFailure, LlmClient,
    RepairContext, RepairOutcome, EDGE_SCHEMA, ENTITY_SCHEMA,
};
use crate::models::{normalize_name, relation_name};

/// How extraction went for one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Complete,
    /// Some records were dropped or a pass returned no usable JSON.
    Partial,
    Skipped,
    Failed,
}

/// A fact whose endpoints index into [`Extraction::entities`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFact {
    pub source: usize,
    pub target: usize,
    pub relation: String,
    pub fact: String,
}

/// Entities (deduplicated by name) and resolved facts from one episode.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub facts: Vec<ResolvedFact>,
    pub dropped: usize,
    pub warnings: Vec<String>,
    pub status: ExtractionStatus,
}

/// Runs the entity pass, then the fact pass over the entities found.
#[derive(Clone)]
pub struct ExtractionService {
    llm: Arc<dyn LlmClient>,
}

impl FromRef<Context> for ExtractionService {
    fn from_ref(ctx: &Context) -> Self {
        Self::new(Arc::clone(&ctx.llm))
    }
}

impl ExtractionService {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Extract from one episode.
    ///
    /// Fails only when the entity pass cannot reach the model. A failed fact
    /// pass keeps the entities and reports [`ExtractionStatus::Partial`].
    pub async fn extract(&self, episode: EpisodeText<'_>) -> Result<Extraction, ExtractionFailure> {
        let mut dropped = 0;
        let mut warnings = Vec::new();
        let mut degraded = false;

        let outcome: RepairOutcome<ExtractedEntity> = generate_structured(
            self.llm.as_ref(),
            &prompts::extract_entities(episode),
            &ENTITY_SCHEMA,
            &RepairContext::default(),
        )
        .await?;
        absorb(&outcome, "entities", &mut dropped, &mut warnings, &mut degraded);

        let entities = merge_duplicates(outcome.into_records());
        tracing::debug!(entities = entities.len(), "Entity pass finished");

        let mut facts = Vec::new();
        if entities.len() >= 2 {
            let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
            let context = RepairContext::with_entities(names.iter().cloned());

            let edges: Result<RepairOutcome<ExtractedEdge>, _> = generate_structured(
                self.llm.as_ref(),
                &prompts::extract_edges(episode, &names),
                &EDGE_SCHEMA,
                &context,
            )
            .await;

            match edges {
                Ok(outcome) => {
                    absorb(&outcome, "facts", &mut dropped, &mut warnings, &mut degraded);
                    let (resolved, unresolved) = resolve_facts(outcome.into_records(), &entities);
                    dropped += unresolved;
                    if unresolved > 0 {
                        degraded = true;
                        warnings.push(format!("{unresolved} fact(s) referenced unknown entities"));
                    }
                    facts = resolved;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Fact pass failed, keeping entities");
                    warnings.push(format!("fact extraction failed: {e}"));
                    degraded = true;
                }
            }
        }

        let status = if degraded {
            ExtractionStatus::Partial
        } else {
            ExtractionStatus::Complete
        };

        Ok(Extraction {
            entities,
            facts,
            dropped,
            warnings,
            status,
        })
    }
}

fn absorb<T>(
    outcome: &RepairOutcome<T>,
    pass: &str,
    dropped: &mut usize,
    warnings: &mut Vec<String>,
    degraded: &mut bool,
) {
    match outcome {
        RepairOutcome::Complete { .. } => {}
        RepairOutcome::Partial { dropped: lost, .. } => {
            *dropped += lost.len();
            *degraded = true;
            warnings.push(format!("{} {pass} record(s) dropped as invalid", lost.len()));
        }
        RepairOutcome::Unrecoverable { reason } => {
            *degraded = true;
            warnings.push(format!("{pass} reply unusable: {reason}"));
        }
    }
}

/// Collapse entities with the same normalized name, keeping the first and
/// any non-empty summary.
fn merge_duplicates(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    let mut merged: Vec<ExtractedEntity> = Vec::with_capacity(entities.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for entity in entities {
        let key = normalize_name(&entity.name);
        match seen.get(&key) {
            Some(&i) => {
                if merged[i].summary.is_empty() && !entity.summary.is_empty() {
                    merged[i].summary = entity.summary;
                }
            }
            None => {
                seen.insert(key, merged.len());
                merged.push(entity);
            }
        }
    }
    merged
}

/// Map edge ids onto entity positions, dropping out-of-range ids and self-loops.
///
/// Returns the resolved facts and how many were dropped.
fn resolve_facts(edges: Vec<ExtractedEdge>, entities: &[ExtractedEntity]) -> (Vec<ResolvedFact>, usize) {
    let position = |id: i64| usize::try_from(id).ok().filter(|&i| i < entities.len());
    let mut facts = Vec::with_capacity(edges.len());
    let mut dropped = 0;

    for edge in edges {
        let (Some(source), Some(target)) = (
            position(edge.source_entity_id),
            position(edge.target_entity_id),
        ) else {
            tracing::warn!(
                source = edge.source_entity_id,
                target = edge.target_entity_id,
                entities = entities.len(),
                "Dropped fact with unresolvable entity id"
            );
            dropped += 1;
            continue;
        };
        if source == target {
            tracing::warn!(entity = %entities[source].name, "Dropped self-referencing fact");
            dropped += 1;
            continue;
        }

        let relation = relation_name(&edge.relation_type);
        let fact = if edge.fact.trim().is_empty() || edge.fact == edge.relation_type {
            format!(
                "{} {} {}",
                entities[source].name,
                relation.to_lowercase().replace('_', " "),
                entities[target].name
            )
        } else {
            edge.fact
        };

        facts.push(ResolvedFact {
            source,
            target,
            relation,
            fact,
        });
    }
    (facts, dropped)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::Message;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with queued responses in order; `Err` entries simulate an outage.
    pub(crate) struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, ExtractionFailure>>>,
        pub calls: Mutex<usize>,
    }

    impl ScriptedLlm {
        pub(crate) fn new(replies: Vec<Result<&str, ExtractionFailure>>) -> Self {
            Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _: &[Message], _: bool) -> Result<String, ExtractionFailure> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("{}".to_string()))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn episode() -> EpisodeText<'static> {
        EpisodeText {
            content: "Alice uses Rust and Tokio",
            source_description: "test",
            reference_time: "2024-01-01T00:00:00Z",
        }
    }

    fn service(replies: Vec<Result<&str, ExtractionFailure>>) -> ExtractionService {
        ExtractionService::new(Arc::new(ScriptedLlm::new(replies)))
    }

    #[tokio::test]
    async fn test_two_passes_resolve_facts() {
        let service = service(vec![
            Ok(r#"{"extracted_entities": [{"name": "Alice", "entity_type_id": 0}, {"name": "Rust", "entity_type_id": 2}]}"#),
            Ok(r#"{"edges": [{"source_entity_id": "ENTITY_0", "target_entity_id": "ENTITY_1", "relation_type": "uses"}]}"#),
        ]);

        let extraction = service.extract(episode()).await.unwrap();
        assert_eq!(extraction.status, ExtractionStatus::Complete);
        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(
            extraction.facts,
            vec![ResolvedFact {
                source: 0,
                target: 1,
                relation: "USES".to_string(),
                fact: "Alice uses Rust".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_single_entity_skips_fact_pass() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(r#"{"entities": ["Alice"]}"#)]));
        let service = ExtractionService::new(llm.clone());

        let extraction = service.extract(episode()).await.unwrap();
        assert_eq!(extraction.entities.len(), 1);
        assert!(extraction.facts.is_empty());
        assert_eq!(*llm.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entity_pass_outage_is_error() {
        let service = service(vec![Err(ExtractionFailure::Timeout)]);
        assert!(matches!(
            service.extract(episode()).await,
            Err(ExtractionFailure::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_fact_pass_outage_keeps_entities() {
        let service = service(vec![
            Ok(r#"["Alice", "Rust"]"#),
            Err(ExtractionFailure::Request("connection reset".into())),
        ]);
        let extraction = service.extract(episode()).await.unwrap();
        assert_eq!(extraction.status, ExtractionStatus::Partial);
        assert_eq!(extraction.entities.len(), 2);
        assert!(extraction.facts.is_empty());
        assert!(extraction.warnings[0].contains("fact extraction failed"));
    }

    #[tokio::test]
    async fn test_garbage_reply_degrades_to_nothing() {
        let service = service(vec![Ok("I am not sure what you mean.")]);
        let extraction = service.extract(episode()).await.unwrap();
        assert!(extraction.entities.is_empty());
        assert_eq!(extraction.status, ExtractionStatus::Partial);
    }

    #[test]
    fn test_merge_duplicates() {
        let entity = |name: &str, summary: &str| ExtractedEntity {
            name: name.into(),
            entity_type_id: 0,
            summary: summary.into(),
        };
        let merged = merge_duplicates(vec![
            entity("Alice", ""),
            entity("alice", "an engineer"),
            entity("Bob", ""),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].summary, "an engineer");
    }

    #[test]
    fn test_resolve_drops_out_of_range_and_self_loops() {
        let entities: Vec<ExtractedEntity> = ["A", "B"]
            .iter()
            .map(|n| ExtractedEntity {
                name: n.to_string(),
                entity_type_id: 0,
                summary: String::new(),
            })
            .collect();
        let edge = |s, t, fact: &str| ExtractedEdge {
            source_entity_id: s,
            target_entity_id: t,
            relation_type: "KNOWS".into(),
            fact: fact.into(),
        };

        let (facts, dropped) = resolve_facts(
            vec![edge(0, 1, "A knows B"), edge(0, 7, "x"), edge(1, 1, "y"), edge(-1, 0, "z")],
            &entities,
        );
        assert_eq!(dropped, 3);
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact, "A knows B");
    }
}
