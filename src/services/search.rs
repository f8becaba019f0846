//! Hybrid search: cosine similarity and keyword overlap fused with RRF.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::di::FromRef;
use crate::embedder::{cosine_similarity, EmbedderClient};
use crate::error::AppError;
use crate::graph::{CandidateQuery, GraphStore};
use crate::models::{EntityEdge, EntityNode, Scored};
use crate::services::memory::{positive_limit, validate_group_id};

/// Reciprocal rank fusion constant.
pub const RRF_K: f32 = 60.0;

/// Ranks stored entities and facts against a free-text query.
#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn EmbedderClient>,
    config: Arc<Config>,
}

impl FromRef<Context> for SearchService {
    fn from_ref(ctx: &Context) -> Self {
        Self::new(
            Arc::clone(&ctx.store),
            Arc::clone(&ctx.embedder),
            Arc::clone(&ctx.config),
        )
    }
}

impl SearchService {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn EmbedderClient>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Entities most relevant to `query`, best first.
    pub async fn search_nodes(
        &self,
        query: &str,
        max_nodes: i64,
        group_ids: &[String],
    ) -> Result<Vec<Scored<EntityNode>>, AppError> {
        let limit = self.validate("max_nodes", query, max_nodes, group_ids)?;
        let query_vector = self.embedder.embed(query.trim()).await?;
        let query_terms = terms(query);
        let selection =
            CandidateQuery::new(&query_vector, &query_terms, self.config.search.candidate_pool);

        let candidates = self.store.entity_candidates(group_ids, &selection).await?;
        let ranked = self.rank(
            &query_vector,
            &query_terms,
            candidates.iter().map(|n| {
                (
                    n.name_embedding.as_deref(),
                    format!("{} {}", n.name, n.summary),
                )
            }),
            limit,
        );

        tracing::debug!(
            candidates = candidates.len(),
            hits = ranked.len(),
            "Node search ranked"
        );
        Ok(collect(candidates, ranked))
    }

    /// Facts most relevant to `query`, best first.
    pub async fn search_facts(
        &self,
        query: &str,
        max_facts: i64,
        group_ids: &[String],
    ) -> Result<Vec<Scored<EntityEdge>>, AppError> {
        let limit = self.validate("max_facts", query, max_facts, group_ids)?;
        let query_vector = self.embedder.embed(query.trim()).await?;
        let query_terms = terms(query);
        let selection =
            CandidateQuery::new(&query_vector, &query_terms, self.config.search.candidate_pool);

        let candidates = self.store.fact_candidates(group_ids, &selection).await?;
        let ranked = self.rank(
            &query_vector,
            &query_terms,
            candidates
                .iter()
                .map(|f| (f.fact_embedding.as_deref(), format!("{} {}", f.name, f.fact))),
            limit,
        );

        tracing::debug!(
            candidates = candidates.len(),
            hits = ranked.len(),
            "Fact search ranked"
        );
        Ok(collect(candidates, ranked))
    }

    fn validate(
        &self,
        field: &'static str,
        query: &str,
        requested: i64,
        group_ids: &[String],
    ) -> Result<usize, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::validation("query", "must not be empty"));
        }
        let limit = positive_limit(field, requested, self.config.search.max_results)?;
        for group in group_ids {
            validate_group_id(group)?;
        }
        Ok(limit)
    }

    fn rank<'a>(
        &self,
        query_vector: &[f32],
        query_terms: &[String],
        items: impl Iterator<Item = (Option<&'a [f32]>, String)>,
        limit: usize,
    ) -> Vec<(usize, f32)> {
        let items: Vec<_> = items.collect();

        let semantic = rank_by(items.iter().map(|(embedding, _)| {
            embedding
                .map(|e| cosine_similarity(query_vector, e))
                .filter(|&s| s >= self.config.search.min_similarity)
        }));
        let keyword = rank_by(items.iter().map(|(_, text)| {
            Some(keyword_score(query_terms, text)).filter(|&s| s > 0.0)
        }));

        let mut fused = fuse(&[semantic, keyword], RRF_K);
        fused.truncate(limit);
        fused
    }
}

/// Pull the ranked items out of `candidates` in rank order.
fn collect<T>(candidates: Vec<T>, ranked: Vec<(usize, f32)>) -> Vec<Scored<T>> {
    let mut slots: Vec<Option<T>> = candidates.into_iter().map(Some).collect();
    ranked
        .into_iter()
        .filter_map(|(i, score)| slots[i].take().map(|item| Scored { item, score }))
        .collect()
}

/// Lowercased alphanumeric terms.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of query terms that occur in `text`.
pub fn keyword_score(query_terms: &[String], text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let text_terms = terms(text);
    let hits = query_terms
        .iter()
        .filter(|q| text_terms.iter().any(|t| t == *q || t.starts_with(q.as_str())))
        .count();
    hits as f32 / query_terms.len() as f32
}

/// Indices of scored items, best first. `None` scores are left out.
///
/// Ties keep input order.
pub fn rank_by(scores: impl Iterator<Item = Option<f32>>) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = scores
        .enumerate()
        .filter_map(|(i, s)| s.map(|s| (i, s)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().map(|(i, _)| i).collect()
}

/// Reciprocal rank fusion: each list contributes `1 / (k + rank)` per item.
pub fn fuse(rankings: &[Vec<usize>], k: f32) -> Vec<(usize, f32)> {
    let mut scores: HashMap<usize, f32> = HashMap::new();
    for ranking in rankings {
        for (rank, &item) in ranking.iter().enumerate() {
            *scores.entry(item).or_default() += 1.0 / (k + rank as f32 + 1.0);
        }
    }
    let mut fused: Vec<(usize, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EphemeralStore;
    use crate::models::Episode;
    use crate::services::memory::tests::HashEmbedder;

    fn unit(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 4];
        v[i] = 1.0;
        v
    }

    fn node(name: &str, group: &str, embedding: Vec<f32>) -> EntityNode {
        let mut node = EntityNode::new(name.into(), group.into(), String::new(), "Concept");
        node.name_embedding = Some(embedding);
        node
    }

    async fn seeded() -> SearchService {
        let store = Arc::new(EphemeralStore::new());
        let episode = Episode::new("e".into(), "b".into(), "g1".into(), "t".into(), None);
        store.save_episode(&episode).await.unwrap();
        // HashEmbedder maps a text to unit(first byte % 4): 'a' = 97 -> 1.
        store
            .save_entities(
                &episode.uuid,
                &[
                    node("zebra", "g1", unit(2)),
                    node("apple", "g1", unit(1)),
                    node("avocado", "g2", unit(1)),
                ],
            )
            .await
            .unwrap();
        SearchService::new(
            store,
            Arc::new(HashEmbedder { fail: false }),
            Arc::new(Config::default()),
        )
    }

    #[tokio::test]
    async fn test_semantic_match_ranks_first() {
        let service = seeded().await;
        let hits = service.search_nodes("apple", 10, &[]).await.unwrap();
        assert_eq!(hits[0].item.name, "apple");
        assert!(hits.iter().all(|h| h.item.name != "zebra"));
    }

    #[tokio::test]
    async fn test_best_match_older_than_candidate_pool() {
        let store = Arc::new(EphemeralStore::new());
        let episode = Episode::new("e".into(), "b".into(), "g1".into(), "t".into(), None);
        store.save_episode(&episode).await.unwrap();

        let mut apple = node("apple", "g1", unit(1));
        apple.created_at = chrono::Utc::now() - chrono::Duration::days(365);
        store.save_entities(&episode.uuid, &[apple]).await.unwrap();
        let newer: Vec<EntityNode> = (0..3)
            .map(|i| node(&format!("zzz{i}"), "g1", unit(2)))
            .collect();
        store.save_entities(&episode.uuid, &newer).await.unwrap();

        let mut config = Config::default();
        config.search.candidate_pool = 3;
        let service = SearchService::new(
            store,
            Arc::new(HashEmbedder { fail: false }),
            Arc::new(config),
        );

        let hits = service.search_nodes("apple", 10, &[]).await.unwrap();
        assert_eq!(hits[0].item.name, "apple");
    }

    #[tokio::test]
    async fn test_group_filter() {
        let service = seeded().await;
        let hits = service
            .search_nodes("avocado", 10, &["g1".into()])
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.item.group_id == "g1"));
    }

    #[tokio::test]
    async fn test_validation_before_embedding() {
        let store = Arc::new(EphemeralStore::new());
        let service = SearchService::new(
            store,
            Arc::new(HashEmbedder { fail: true }),
            Arc::new(Config::default()),
        );
        assert!(matches!(
            service.search_nodes("  ", 10, &[]).await,
            Err(AppError::Validation { field: "query", .. })
        ));
        assert!(matches!(
            service.search_facts("x", 0, &[]).await,
            Err(AppError::Validation { field: "max_facts", .. })
        ));
        assert!(matches!(
            service.search_facts("x", 5, &[]).await,
            Err(AppError::Embedding(_))
        ));
    }

    #[test]
    fn test_keyword_score() {
        let q = terms("Rust async");
        assert_eq!(keyword_score(&q, "Rust is fast"), 0.5);
        assert_eq!(keyword_score(&q, "asynchronous rust"), 1.0);
        assert_eq!(keyword_score(&q, "python"), 0.0);
    }

    #[test]
    fn test_rank_by_skips_none_and_keeps_ties_stable() {
        let ranked = rank_by([Some(0.5), None, Some(0.9), Some(0.5)].into_iter());
        assert_eq!(ranked, vec![2, 0, 3]);
    }

    #[test]
    fn test_fuse_rewards_agreement() {
        let fused = fuse(&[vec![0, 1, 2], vec![1, 3]], RRF_K);
        assert_eq!(fused[0].0, 1);
        let ids: Vec<usize> = fused.iter().map(|(i, _)| *i).collect();
        assert_eq!(ids.len(), 4);
        assert!((fused[0].1 - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
    }
}
