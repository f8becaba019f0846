//! Integration tests for the Neo4j store.
//!
//! These tests require a running Neo4j instance and delete everything in the
//! `it-*` groups they use.
//! Run with: `cargo test --features integration --test neo4j_integration`

#![cfg(feature = "integration")]

use chrono::{Duration, Utc};
use ollama_memory::config::Neo4jConfig;
use ollama_memory::graph::{CandidateQuery, GraphStore, Neo4jStore};
use ollama_memory::models::{EntityEdge, EntityNode, Episode};
use serial_test::serial;

const TEST_URI: &str = "bolt://localhost:7687";
const TEST_PASSWORD: &str = "password";

async fn connect() -> Neo4jStore {
    let config = Neo4jConfig {
        uri: std::env::var("NEO4J_URI").unwrap_or_else(|_| TEST_URI.to_string()),
        password: Some(
            std::env::var("NEO4J_PASSWORD").unwrap_or_else(|_| TEST_PASSWORD.to_string()),
        ),
        ..Neo4jConfig::default()
    };
    Neo4jStore::connect(&config)
        .await
        .expect("Failed to connect to test database")
}

async fn cleanup(store: &Neo4jStore, groups: &[&str]) {
    let groups: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
    store.clear(&groups).await.expect("cleanup failed");
}

fn episode(group: &str) -> Episode {
    Episode::new(
        "it".into(),
        "Alice uses Rust".into(),
        group.into(),
        "integration".into(),
        None,
    )
}

// All tests run serially since they share one database
#[serial]
mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_and_indices() {
        let store = connect().await;
        store.ping().await.unwrap();
        let report = store.build_indices(768).await.unwrap();
        assert!(report.applied > 0);

        // Second run only hits IF NOT EXISTS.
        store.build_indices(768).await.unwrap();
    }

    #[tokio::test]
    async fn test_episode_entity_fact_round_trip() {
        let store = connect().await;
        cleanup(&store, &["it-a"]).await;

        let ep = episode("it-a");
        store.save_episode(&ep).await.unwrap();

        let mut alice = EntityNode::new("Alice".into(), "it-a".into(), String::new(), "Person");
        alice.name_embedding = Some(vec![0.6, 0.8]);
        let rust = EntityNode::new("Rust".into(), "it-a".into(), "a language".into(), "Technology");
        store
            .save_entities(&ep.uuid, &[alice.clone(), rust.clone()])
            .await
            .unwrap();

        let fact = EntityEdge::new(
            alice.uuid.clone(),
            rust.uuid.clone(),
            "USES".into(),
            "Alice uses Rust".into(),
            "it-a".into(),
            ep.uuid.clone(),
            Utc::now(),
        );
        store.save_facts(&[fact.clone()]).await.unwrap();

        let episodes = store.recent_episodes(Some("it-a"), 5).await.unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].uuid, ep.uuid);

        let found = store
            .find_entities_by_name("it-a", &["alice".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_embedding.as_deref(), Some(&[0.6, 0.8][..]));

        let facts = store
            .fact_candidates(&["it-a".into()], &CandidateQuery::recent(10))
            .await
            .unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].source_node_uuid, alice.uuid);
        assert_eq!(facts[0].episodes, vec![ep.uuid.clone()]);

        cleanup(&store, &["it-a"]).await;
    }

    #[tokio::test]
    async fn test_clear_only_touches_named_group() {
        let store = connect().await;
        cleanup(&store, &["it-b", "it-c"]).await;

        for group in ["it-b", "it-c"] {
            let ep = episode(group);
            store.save_episode(&ep).await.unwrap();
            let node = EntityNode::new("Bob".into(), group.into(), String::new(), "Person");
            store.save_entities(&ep.uuid, &[node]).await.unwrap();
        }

        let report = store.clear(&["it-b".to_string()]).await.unwrap();
        assert_eq!(report.episodes, 1);
        assert_eq!(report.entities, 1);

        let left = store
            .entity_candidates(&["it-b".into(), "it-c".into()], &CandidateQuery::recent(10))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].group_id, "it-c");

        cleanup(&store, &["it-c"]).await;
    }

    #[tokio::test]
    async fn test_clear_counts_everything_in_one_pass() {
        let store = connect().await;
        cleanup(&store, &["it-d"]).await;

        let ep = episode("it-d");
        store.save_episode(&ep).await.unwrap();
        let a = EntityNode::new("A".into(), "it-d".into(), String::new(), "Concept");
        let b = EntityNode::new("B".into(), "it-d".into(), String::new(), "Concept");
        store
            .save_entities(&ep.uuid, &[a.clone(), b.clone()])
            .await
            .unwrap();
        let fact = EntityEdge::new(
            a.uuid.clone(),
            b.uuid.clone(),
            "USES".into(),
            "A uses B".into(),
            "it-d".into(),
            ep.uuid.clone(),
            Utc::now(),
        );
        store.save_facts(&[fact]).await.unwrap();

        let report = store.clear(&["it-d".to_string()]).await.unwrap();
        assert_eq!((report.facts, report.episodes, report.entities), (1, 1, 2));

        let again = store.clear(&["it-d".to_string()]).await.unwrap();
        assert_eq!((again.facts, again.episodes, again.entities), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_keyword_candidates_reach_older_entities() {
        let store = connect().await;
        cleanup(&store, &["it-e"]).await;

        let ep = episode("it-e");
        store.save_episode(&ep).await.unwrap();
        let mut apple = EntityNode::new("Apple".into(), "it-e".into(), String::new(), "Concept");
        apple.created_at = Utc::now() - Duration::days(365);
        let newer: Vec<EntityNode> = (0..3)
            .map(|i| EntityNode::new(format!("zzz{i}"), "it-e".into(), String::new(), "Concept"))
            .collect();
        store.save_entities(&ep.uuid, &[apple]).await.unwrap();
        store.save_entities(&ep.uuid, &newer).await.unwrap();

        let recent = store
            .entity_candidates(&["it-e".into()], &CandidateQuery::recent(3))
            .await
            .unwrap();
        assert!(recent.iter().all(|n| n.name != "Apple"));

        // No embeddings stored, so only the keyword match can find it.
        let vector = vec![1.0; 768];
        let terms = vec!["apple".to_string()];
        let found = store
            .entity_candidates(&["it-e".into()], &CandidateQuery::new(&vector, &terms, 3))
            .await
            .unwrap();
        assert!(found.iter().any(|n| n.name == "Apple"));

        cleanup(&store, &["it-e"]).await;
    }
}
