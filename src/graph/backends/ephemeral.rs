//! In-process store with the same semantics as the Neo4j backend.
//!
//! Contents live for the lifetime of the process. Used by tests and for
//! running the server without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedder::cosine_similarity;
use crate::error::AppError;
use crate::graph::{in_groups, CandidateQuery, ClearReport, GraphStore, SchemaReport};
use crate::models::{normalize_name, EntityEdge, EntityNode, Episode};

#[derive(Default)]
struct State {
    episodes: Vec<Episode>,
    entities: HashMap<String, EntityNode>,
    facts: Vec<EntityEdge>,
    /// (episode uuid, entity uuid)
    mentions: Vec<(String, String)>,
}

#[derive(Default)]
pub struct EphemeralStore {
    state: RwLock<State>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `MENTIONS` links from `episode_uuid`.
    pub async fn mention_count(&self, episode_uuid: &str) -> usize {
        self.state
            .read()
            .await
            .mentions
            .iter()
            .filter(|(episode, _)| episode == episode_uuid)
            .count()
    }
}

fn newest_first<T>(items: &mut [T], created: impl Fn(&T) -> chrono::DateTime<chrono::Utc>) {
    items.sort_by(|a, b| created(b).cmp(&created(a)));
}

/// Full-scan version of the Neo4j candidate lookups: the nearest `limit`
/// by cosine, then up to `limit` newest records containing a term.
fn select<T: Clone>(
    mut items: Vec<&T>,
    query: &CandidateQuery<'_>,
    embedding: impl Fn(&T) -> Option<&[f32]>,
    text: impl Fn(&T) -> String,
    created: impl Fn(&T) -> chrono::DateTime<chrono::Utc>,
) -> Vec<T> {
    newest_first(&mut items, |item| created(item));
    if query.is_recent() {
        return items.into_iter().take(query.limit).cloned().collect();
    }

    let mut picked: Vec<usize> = Vec::new();
    if let Some(vector) = query.vector {
        let mut nearest: Vec<(usize, f32)> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| embedding(item).map(|e| (i, cosine_similarity(vector, e))))
            .collect();
        nearest.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        picked.extend(nearest.into_iter().take(query.limit).map(|(i, _)| i));
    }
    let keyword: Vec<usize> = (0..items.len())
        .filter(|&i| query.matches_terms(&text(items[i])))
        .take(query.limit)
        .collect();
    for i in keyword {
        if !picked.contains(&i) {
            picked.push(i);
        }
    }

    picked.into_iter().map(|i| items[i].clone()).collect()
}

#[async_trait]
impl GraphStore for EphemeralStore {
    fn backend(&self) -> &'static str {
        "ephemeral"
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn build_indices(&self, _dimensions: usize) -> Result<SchemaReport, AppError> {
        Ok(SchemaReport::default())
    }

    async fn save_episode(&self, episode: &Episode) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        state.episodes.retain(|e| e.uuid != episode.uuid);
        state.episodes.push(episode.clone());
        Ok(())
    }

    async fn find_entities_by_name(
        &self,
        group_id: &str,
        names: &[String],
    ) -> Result<Vec<EntityNode>, AppError> {
        let keys: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
        let state = self.state.read().await;
        let mut found: Vec<EntityNode> = state
            .entities
            .values()
            .filter(|n| n.group_id == group_id && keys.contains(&n.dedupe_key()))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn save_entities(
        &self,
        episode_uuid: &str,
        entities: &[EntityNode],
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let episode_exists = state.episodes.iter().any(|e| e.uuid == episode_uuid);

        for entity in entities {
            let mut stored = entity.clone();
            if let Some(existing) = state.entities.get(&entity.uuid) {
                stored.created_at = existing.created_at;
                if stored.name_embedding.is_none() {
                    stored.name_embedding = existing.name_embedding.clone();
                }
            }
            state.entities.insert(entity.uuid.clone(), stored);

            let link = (episode_uuid.to_string(), entity.uuid.clone());
            if episode_exists && !state.mentions.contains(&link) {
                state.mentions.push(link);
            }
        }
        Ok(())
    }

    async fn save_facts(&self, facts: &[EntityEdge]) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        for fact in facts {
            let endpoints_exist = state.entities.contains_key(&fact.source_node_uuid)
                && state.entities.contains_key(&fact.target_node_uuid);
            if !endpoints_exist {
                // Matches the MATCH-then-MERGE behaviour of the Neo4j backend.
                tracing::debug!(uuid = %fact.uuid, "Skipping fact with missing endpoint");
                continue;
            }
            state.facts.retain(|f| f.uuid != fact.uuid);
            state.facts.push(fact.clone());
        }
        Ok(())
    }

    async fn entity_candidates(
        &self,
        group_ids: &[String],
        query: &CandidateQuery<'_>,
    ) -> Result<Vec<EntityNode>, AppError> {
        let state = self.state.read().await;
        let nodes = state
            .entities
            .values()
            .filter(|n| in_groups(group_ids, &n.group_id))
            .collect();
        Ok(select(
            nodes,
            query,
            |n| n.name_embedding.as_deref(),
            |n| format!("{} {}", n.name, n.summary),
            |n| n.created_at,
        ))
    }

    async fn fact_candidates(
        &self,
        group_ids: &[String],
        query: &CandidateQuery<'_>,
    ) -> Result<Vec<EntityEdge>, AppError> {
        let state = self.state.read().await;
        let facts = state
            .facts
            .iter()
            .filter(|f| in_groups(group_ids, &f.group_id))
            .collect();
        Ok(select(
            facts,
            query,
            |f| f.fact_embedding.as_deref(),
            |f| format!("{} {}", f.name, f.fact),
            |f| f.created_at,
        ))
    }

    async fn recent_episodes(
        &self,
        group_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Episode>, AppError> {
        let state = self.state.read().await;
        let mut episodes: Vec<Episode> = state
            .episodes
            .iter()
            .filter(|e| group_id.map_or(true, |g| e.group_id == g))
            .cloned()
            .collect();
        newest_first(&mut episodes, |e| e.created_at);
        episodes.truncate(limit);
        Ok(episodes)
    }

    async fn clear(&self, group_ids: &[String]) -> Result<ClearReport, AppError> {
        let mut state = self.state.write().await;

        let facts_before = state.facts.len();
        state.facts.retain(|f| !in_groups(group_ids, &f.group_id));

        let episodes_before = state.episodes.len();
        state.episodes.retain(|e| !in_groups(group_ids, &e.group_id));

        let entities_before = state.entities.len();
        state.entities.retain(|_, n| !in_groups(group_ids, &n.group_id));

        // Drop anything left pointing at removed nodes.
        let State {
            episodes,
            entities,
            facts,
            mentions,
        } = &mut *state;
        facts.retain(|f| {
            entities.contains_key(&f.source_node_uuid) && entities.contains_key(&f.target_node_uuid)
        });
        mentions.retain(|(episode, entity)| {
            entities.contains_key(entity) && episodes.iter().any(|e| &e.uuid == episode)
        });

        Ok(ClearReport {
            episodes: (episodes_before - episodes.len()) as u64,
            entities: (entities_before - entities.len()) as u64,
            facts: (facts_before - facts.len()) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn episode(group: &str, minutes_ago: i64) -> Episode {
        let mut episode = Episode::new(
            format!("ep-{minutes_ago}"),
            "body".into(),
            group.into(),
            "test".into(),
            None,
        );
        episode.created_at = Utc::now() - Duration::minutes(minutes_ago);
        episode
    }

    fn entity(name: &str, group: &str) -> EntityNode {
        EntityNode::new(name.into(), group.into(), String::new(), "Concept")
    }

    #[tokio::test]
    async fn test_recent_episodes_newest_first_and_filtered() {
        let store = EphemeralStore::new();
        store.save_episode(&episode("g1", 10)).await.unwrap();
        store.save_episode(&episode("g1", 1)).await.unwrap();
        store.save_episode(&episode("g2", 5)).await.unwrap();

        let all = store.recent_episodes(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].name, "ep-1");

        let g1 = store.recent_episodes(Some("g1"), 1).await.unwrap();
        assert_eq!(g1.len(), 1);
        assert_eq!(g1[0].name, "ep-1");
    }

    #[tokio::test]
    async fn test_entities_mentions_and_name_lookup() {
        let store = EphemeralStore::new();
        let ep = episode("g1", 0);
        store.save_episode(&ep).await.unwrap();

        let alice = entity("Alice", "g1");
        store.save_entities(&ep.uuid, &[alice.clone()]).await.unwrap();
        assert_eq!(store.mention_count(&ep.uuid).await, 1);

        let found = store
            .find_entities_by_name("g1", &["  ALICE ".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uuid, alice.uuid);

        let other_group = store
            .find_entities_by_name("g2", &["alice".to_string()])
            .await
            .unwrap();
        assert!(other_group.is_empty());
    }

    #[tokio::test]
    async fn test_facts_need_endpoints() {
        let store = EphemeralStore::new();
        let ep = episode("g1", 0);
        store.save_episode(&ep).await.unwrap();
        let (a, b) = (entity("A", "g1"), entity("B", "g1"));
        store.save_entities(&ep.uuid, &[a.clone(), b.clone()]).await.unwrap();

        let good = EntityEdge::new(
            a.uuid.clone(),
            b.uuid.clone(),
            "USES".into(),
            "A uses B".into(),
            "g1".into(),
            ep.uuid.clone(),
            Utc::now(),
        );
        let dangling = EntityEdge::new(
            a.uuid.clone(),
            "missing".into(),
            "USES".into(),
            "A uses ?".into(),
            "g1".into(),
            ep.uuid.clone(),
            Utc::now(),
        );
        store.save_facts(&[good, dangling]).await.unwrap();

        let facts = store
            .fact_candidates(&[], &CandidateQuery::recent(10))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact, "A uses B");
    }

    #[tokio::test]
    async fn test_clear_by_group() {
        let store = EphemeralStore::new();
        let (ep1, ep2) = (episode("g1", 0), episode("g2", 0));
        store.save_episode(&ep1).await.unwrap();
        store.save_episode(&ep2).await.unwrap();
        store.save_entities(&ep1.uuid, &[entity("A", "g1")]).await.unwrap();
        store.save_entities(&ep2.uuid, &[entity("B", "g2")]).await.unwrap();

        let report = store.clear(&["g1".to_string()]).await.unwrap();
        assert_eq!(report.episodes, 1);
        assert_eq!(report.entities, 1);

        assert_eq!(store.recent_episodes(None, 10).await.unwrap().len(), 1);
        let left = store
            .entity_candidates(&[], &CandidateQuery::recent(10))
            .await
            .unwrap();
        assert_eq!(left[0].name, "B");

        let report = store.clear(&[]).await.unwrap();
        assert_eq!(report.episodes, 1);
        assert!(store
            .entity_candidates(&[], &CandidateQuery::recent(10))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_candidates_reach_past_the_newest_records() {
        let store = EphemeralStore::new();
        let ep = episode("g1", 0);
        store.save_episode(&ep).await.unwrap();

        let mut apple = entity("apple", "g1");
        apple.name_embedding = Some(vec![1.0, 0.0]);
        apple.created_at = Utc::now() - Duration::days(30);
        let mut newer = Vec::new();
        for i in 0..3 {
            let mut node = entity(&format!("zzz{i}"), "g1");
            node.name_embedding = Some(vec![0.0, 1.0]);
            newer.push(node);
        }
        store.save_entities(&ep.uuid, &[apple]).await.unwrap();
        store.save_entities(&ep.uuid, &newer).await.unwrap();

        let recent = store
            .entity_candidates(&[], &CandidateQuery::recent(3))
            .await
            .unwrap();
        assert!(recent.iter().all(|n| n.name != "apple"));

        let vector = [1.0, 0.0];
        let nearest = store
            .entity_candidates(&[], &CandidateQuery::new(&vector, &[], 1))
            .await
            .unwrap();
        assert_eq!(nearest.len(), 1);
        assert_eq!(nearest[0].name, "apple");

        let terms = vec!["appl".to_string()];
        let by_term = store
            .entity_candidates(&[], &CandidateQuery::new(&[0.0, 1.0], &terms, 1))
            .await
            .unwrap();
        assert_eq!(by_term.len(), 2);
        assert!(by_term.iter().any(|n| n.name == "apple"));
    }
}
