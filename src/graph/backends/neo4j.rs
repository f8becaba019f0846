//! Neo4j backend over Bolt using `neo4rs`.
//!
//! Layout:
//! - `(:Episodic {uuid, name, content, group_id, source, source_description, created_at, valid_at})`
//! - `(:Entity {uuid, name, name_key, group_id, summary, labels, name_embedding, created_at})`
//! - `(:Episodic)-[:MENTIONS {group_id, created_at}]->(:Entity)`
//! - `(:Entity)-[:RELATES_TO {uuid, name, fact, fact_embedding, group_id, episodes, created_at, valid_at, invalid_at}]->(:Entity)`
//!
//! Timestamps are stored as RFC 3339 strings (see [`format_timestamp`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, ConfigBuilder, Graph, Node, Query, Relation, Row, Txn};

use crate::config::Neo4jConfig;
use crate::error::AppError;
use crate::graph::{schema, CandidateQuery, ClearReport, GraphStore, SchemaReport};
use crate::models::{
    format_timestamp, normalize_name, parse_timestamp, EntityEdge, EntityNode, Episode,
};

/// Neo4j-backed store sharing one connection pool.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    /// Connect and verify the server answers.
    pub async fn connect(config: &Neo4jConfig) -> Result<Self, AppError> {
        let bolt = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_deref().unwrap_or(""))
            .db(config.database.as_str())
            .max_connections(config.max_connections)
            .build()?;

        let graph = Graph::connect(bolt).await.map_err(|e| AppError::Connectivity {
            service: "neo4j",
            message: e.to_string(),
        })?;

        let store = Self { graph };
        store.ping().await?;
        tracing::info!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(store)
    }

    /// Run a read query and collect every row.
    async fn fetch(&self, q: neo4rs::Query, label: &str) -> Result<Vec<Row>, AppError> {
        let mut stream = self.graph.execute(q).await.map_err(|e| query_error(e, label))?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(|e| query_error(e, label))? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Run a `... RETURN count(*) AS deleted` statement inside `txn`.
    async fn delete_count(txn: &mut Txn, q: Query, label: &str) -> Result<u64, AppError> {
        let mut stream = txn.execute(q).await.map_err(|e| query_error(e, label))?;
        let mut deleted = 0;
        while let Some(row) = stream
            .next(txn.handle())
            .await
            .map_err(|e| query_error(e, label))?
        {
            deleted = row.get::<i64>("deleted").unwrap_or(0);
        }
        Ok(deleted.max(0) as u64)
    }

    /// Facts, then episodes, then entities, all in `txn`.
    async fn clear_in(txn: &mut Txn, group_ids: &[String]) -> Result<ClearReport, AppError> {
        let groups = group_ids.to_vec();

        // Facts first: detaching entities would otherwise remove them uncounted.
        let facts = Self::delete_count(
            txn,
            query(
                "MATCH ()-[r:RELATES_TO]->()
                 WHERE size($group_ids) = 0 OR r.group_id IN $group_ids
                 DELETE r RETURN count(*) AS deleted",
            )
            .param("group_ids", groups.clone()),
            "clear facts",
        )
        .await?;
        let episodes = Self::delete_count(
            txn,
            query(
                "MATCH (e:Episodic)
                 WHERE size($group_ids) = 0 OR e.group_id IN $group_ids
                 DETACH DELETE e RETURN count(*) AS deleted",
            )
            .param("group_ids", groups.clone()),
            "clear episodes",
        )
        .await?;
        let entities = Self::delete_count(
            txn,
            query(
                "MATCH (n:Entity)
                 WHERE size($group_ids) = 0 OR n.group_id IN $group_ids
                 DETACH DELETE n RETURN count(*) AS deleted",
            )
            .param("group_ids", groups),
            "clear entities",
        )
        .await?;

        Ok(ClearReport {
            episodes,
            entities,
            facts,
        })
    }

    /// Nearest-neighbour rows from a vector index.
    ///
    /// `None` when the index is missing, e.g. before `init` or on servers
    /// without vector support.
    async fn nearest(&self, q: Query, label: &str) -> Option<Vec<Row>> {
        match self.fetch(q, label).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!(error = %e, "{label}: vector index unavailable, using newest records");
                None
            }
        }
    }

    async fn recent_entities(
        &self,
        group_ids: &[String],
        limit: usize,
    ) -> Result<Vec<EntityNode>, AppError> {
        let rows = self
            .fetch(
                query(
                    "MATCH (n:Entity)
                     WHERE size($group_ids) = 0 OR n.group_id IN $group_ids
                     RETURN n ORDER BY n.created_at DESC LIMIT $limit",
                )
                .param("group_ids", group_ids.to_vec())
                .param("limit", limit as i64),
                "recent entities",
            )
            .await?;
        rows.iter().map(|row| Self::row_to_entity(row, "n")).collect()
    }

    async fn recent_facts(
        &self,
        group_ids: &[String],
        limit: usize,
    ) -> Result<Vec<EntityEdge>, AppError> {
        let rows = self
            .fetch(
                query(
                    "MATCH (s:Entity)-[r:RELATES_TO]->(t:Entity)
                     WHERE size($group_ids) = 0 OR r.group_id IN $group_ids
                     RETURN r, s.uuid AS source, t.uuid AS target
                     ORDER BY r.created_at DESC LIMIT $limit",
                )
                .param("group_ids", group_ids.to_vec())
                .param("limit", limit as i64),
                "recent facts",
            )
            .await?;
        rows.iter().map(Self::row_to_fact).collect()
    }

    fn row_to_entity(row: &Row, field: &str) -> Result<EntityNode, AppError> {
        let node: Node = row.get(field).map_err(|e| AppError::Query {
            message: e.to_string(),
            query: format!("get {field} node"),
        })?;
        Self::node_to_entity(&node)
    }

    fn node_to_entity(node: &Node) -> Result<EntityNode, AppError> {
        let uuid: String = node.get("uuid").map_err(|e| AppError::Query {
            message: e.to_string(),
            query: "get entity uuid".to_string(),
        })?;

        let name_embedding: Option<Vec<f64>> = node.get("name_embedding").ok();

        Ok(EntityNode {
            uuid,
            name: node.get("name").unwrap_or_default(),
            group_id: node.get("group_id").unwrap_or_default(),
            summary: node.get("summary").unwrap_or_default(),
            labels: node
                .get("labels")
                .unwrap_or_else(|_| vec!["Entity".to_string()]),
            name_embedding: name_embedding.map(|v| v.into_iter().map(|f| f as f32).collect()),
            created_at: timestamp(node.get::<String>("created_at").ok()),
        })
    }

    fn row_to_fact(row: &Row) -> Result<EntityEdge, AppError> {
        let rel: Relation = row.get("r").map_err(|e| AppError::Query {
            message: e.to_string(),
            query: "get fact relation".to_string(),
        })?;
        let uuid: String = rel.get("uuid").map_err(|e| AppError::Query {
            message: e.to_string(),
            query: "get fact uuid".to_string(),
        })?;

        let fact_embedding: Option<Vec<f64>> = rel.get("fact_embedding").ok();

        Ok(EntityEdge {
            uuid,
            source_node_uuid: row.get("source").unwrap_or_default(),
            target_node_uuid: row.get("target").unwrap_or_default(),
            name: rel.get("name").unwrap_or_default(),
            fact: rel.get("fact").unwrap_or_default(),
            fact_embedding: fact_embedding.map(|v| v.into_iter().map(|f| f as f32).collect()),
            group_id: rel.get("group_id").unwrap_or_default(),
            episodes: rel.get("episodes").unwrap_or_default(),
            created_at: timestamp(rel.get::<String>("created_at").ok()),
            valid_at: rel
                .get::<String>("valid_at")
                .ok()
                .and_then(|s| parse_timestamp(&s)),
            invalid_at: rel
                .get::<String>("invalid_at")
                .ok()
                .and_then(|s| parse_timestamp(&s)),
        })
    }

    fn row_to_episode(row: &Row) -> Result<Episode, AppError> {
        let node: Node = row.get("e").map_err(|e| AppError::Query {
            message: e.to_string(),
            query: "get episode node".to_string(),
        })?;
        let uuid: String = node.get("uuid").map_err(|e| AppError::Query {
            message: e.to_string(),
            query: "get episode uuid".to_string(),
        })?;
        let created_at = timestamp(node.get::<String>("created_at").ok());

        Ok(Episode {
            uuid,
            name: node.get("name").unwrap_or_default(),
            content: node.get("content").unwrap_or_default(),
            group_id: node.get("group_id").unwrap_or_default(),
            source: node.get("source").unwrap_or_else(|_| "text".to_string()),
            source_description: node.get("source_description").unwrap_or_default(),
            created_at,
            valid_at: node
                .get::<String>("valid_at")
                .ok()
                .and_then(|s| parse_timestamp(&s))
                .unwrap_or(created_at),
        })
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    fn backend(&self) -> &'static str {
        "neo4j"
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.fetch(query("RETURN 1 AS ok"), "ping")
            .await
            .map(|_| ())
            .map_err(|e| AppError::Connectivity {
                service: "neo4j",
                message: e.to_string(),
            })
    }

    async fn build_indices(&self, dimensions: usize) -> Result<SchemaReport, AppError> {
        let mut report = SchemaReport::default();

        for statement in schema::CONSTRAINTS.iter().chain(schema::INDEXES) {
            self.graph.run(query(statement)).await?;
            report.applied += 1;
        }

        // These may fail on older Neo4j versions - log warning but don't fail.
        for statement in schema::vector_indexes(dimensions) {
            match self.graph.run(query(&statement)).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    tracing::warn!("Could not create vector index: {}", e);
                    report.skipped.push(e.to_string());
                }
            }
        }

        tracing::info!(
            applied = report.applied,
            skipped = report.skipped.len(),
            "Graph schema ready"
        );
        Ok(report)
    }

    async fn save_episode(&self, episode: &Episode) -> Result<(), AppError> {
        self.graph
            .run(
                query(
                    "MERGE (e:Episodic {uuid: $uuid})
                     SET e.name = $name, e.content = $content, e.group_id = $group_id,
                         e.source = $source, e.source_description = $source_description,
                         e.created_at = $created_at, e.valid_at = $valid_at",
                )
                .param("uuid", episode.uuid.as_str())
                .param("name", episode.name.as_str())
                .param("content", episode.content.as_str())
                .param("group_id", episode.group_id.as_str())
                .param("source", episode.source.as_str())
                .param("source_description", episode.source_description.as_str())
                .param("created_at", format_timestamp(&episode.created_at))
                .param("valid_at", format_timestamp(&episode.valid_at)),
            )
            .await?;
        Ok(())
    }

    async fn find_entities_by_name(
        &self,
        group_id: &str,
        names: &[String],
    ) -> Result<Vec<EntityNode>, AppError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();

        let rows = self
            .fetch(
                query(
                    "MATCH (n:Entity)
                     WHERE n.group_id = $group_id AND n.name_key IN $keys
                     RETURN n ORDER BY n.created_at",
                )
                .param("group_id", group_id)
                .param("keys", keys),
                "find entities by name",
            )
            .await?;

        rows.iter().map(|row| Self::row_to_entity(row, "n")).collect()
    }

    async fn save_entities(
        &self,
        episode_uuid: &str,
        entities: &[EntityNode],
    ) -> Result<(), AppError> {
        if entities.is_empty() {
            return Ok(());
        }

        let mut txn = self.graph.start_txn().await?;
        for entity in entities {
            let embedding = entity.name_embedding.as_deref().map(to_f64);

            txn.run(
                query(
                    "MERGE (n:Entity {uuid: $uuid})
                     ON CREATE SET n.created_at = $created_at
                     SET n.name = $name, n.name_key = $name_key, n.group_id = $group_id,
                         n.summary = $summary, n.labels = $labels,
                         n.name_embedding = coalesce($embedding, n.name_embedding)
                     WITH n
                     MATCH (e:Episodic {uuid: $episode_uuid})
                     MERGE (e)-[m:MENTIONS]->(n)
                     ON CREATE SET m.group_id = $group_id, m.created_at = $created_at",
                )
                .param("uuid", entity.uuid.as_str())
                .param("name", entity.name.as_str())
                .param("name_key", entity.dedupe_key())
                .param("group_id", entity.group_id.as_str())
                .param("summary", entity.summary.as_str())
                .param("labels", entity.labels.clone())
                .param("embedding", embedding)
                .param("created_at", format_timestamp(&entity.created_at))
                .param("episode_uuid", episode_uuid),
            )
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn save_facts(&self, facts: &[EntityEdge]) -> Result<(), AppError> {
        if facts.is_empty() {
            return Ok(());
        }

        let mut txn = self.graph.start_txn().await?;
        for fact in facts {
            let embedding = fact.fact_embedding.as_deref().map(to_f64);

            txn.run(
                query(
                    "MATCH (s:Entity {uuid: $source}), (t:Entity {uuid: $target})
                     MERGE (s)-[r:RELATES_TO {uuid: $uuid}]->(t)
                     SET r.name = $name, r.fact = $fact, r.fact_embedding = $embedding,
                         r.group_id = $group_id, r.episodes = $episodes,
                         r.created_at = $created_at, r.valid_at = $valid_at,
                         r.invalid_at = $invalid_at",
                )
                .param("source", fact.source_node_uuid.as_str())
                .param("target", fact.target_node_uuid.as_str())
                .param("uuid", fact.uuid.as_str())
                .param("name", fact.name.as_str())
                .param("fact", fact.fact.as_str())
                .param("embedding", embedding)
                .param("group_id", fact.group_id.as_str())
                .param("episodes", fact.episodes.clone())
                .param("created_at", format_timestamp(&fact.created_at))
                .param("valid_at", fact.valid_at.as_ref().map(format_timestamp))
                .param("invalid_at", fact.invalid_at.as_ref().map(format_timestamp)),
            )
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn entity_candidates(
        &self,
        group_ids: &[String],
        candidates: &CandidateQuery<'_>,
    ) -> Result<Vec<EntityNode>, AppError> {
        if candidates.is_recent() {
            return self.recent_entities(group_ids, candidates.limit).await;
        }

        let mut nodes = Vec::new();
        if let Some(vector) = candidates.vector {
            let q = query(
                "CALL db.index.vector.queryNodes($index, $k, $vector)
                 YIELD node AS n, score
                 WHERE size($group_ids) = 0 OR n.group_id IN $group_ids
                 RETURN n ORDER BY score DESC",
            )
            .param("index", schema::ENTITY_VECTOR_INDEX)
            .param("k", candidates.limit as i64)
            .param("vector", to_f64(vector))
            .param("group_ids", group_ids.to_vec());

            match self.nearest(q, "nearest entities").await {
                Some(rows) => {
                    for row in &rows {
                        nodes.push(Self::row_to_entity(row, "n")?);
                    }
                }
                None => nodes = self.recent_entities(group_ids, candidates.limit).await?,
            }
        }

        if !candidates.terms.is_empty() {
            let rows = self
                .fetch(
                    query(
                        "MATCH (n:Entity)
                         WHERE (size($group_ids) = 0 OR n.group_id IN $group_ids)
                           AND any(term IN $terms WHERE toLower(n.name) CONTAINS term
                                   OR toLower(coalesce(n.summary, '')) CONTAINS term)
                         RETURN n ORDER BY n.created_at DESC LIMIT $limit",
                    )
                    .param("group_ids", group_ids.to_vec())
                    .param("terms", candidates.terms.to_vec())
                    .param("limit", candidates.limit as i64),
                    "entity keyword match",
                )
                .await?;
            for row in &rows {
                let node = Self::row_to_entity(row, "n")?;
                if !nodes.iter().any(|n| n.uuid == node.uuid) {
                    nodes.push(node);
                }
            }
        }

        Ok(nodes)
    }

    async fn fact_candidates(
        &self,
        group_ids: &[String],
        candidates: &CandidateQuery<'_>,
    ) -> Result<Vec<EntityEdge>, AppError> {
        if candidates.is_recent() {
            return self.recent_facts(group_ids, candidates.limit).await;
        }

        let mut facts = Vec::new();
        if let Some(vector) = candidates.vector {
            let q = query(
                "CALL db.index.vector.queryRelationships($index, $k, $vector)
                 YIELD relationship AS r, score
                 WHERE size($group_ids) = 0 OR r.group_id IN $group_ids
                 RETURN r, startNode(r).uuid AS source, endNode(r).uuid AS target
                 ORDER BY score DESC",
            )
            .param("index", schema::FACT_VECTOR_INDEX)
            .param("k", candidates.limit as i64)
            .param("vector", to_f64(vector))
            .param("group_ids", group_ids.to_vec());

            match self.nearest(q, "nearest facts").await {
                Some(rows) => {
                    for row in &rows {
                        facts.push(Self::row_to_fact(row)?);
                    }
                }
                None => facts = self.recent_facts(group_ids, candidates.limit).await?,
            }
        }

        if !candidates.terms.is_empty() {
            let rows = self
                .fetch(
                    query(
                        "MATCH (s:Entity)-[r:RELATES_TO]->(t:Entity)
                         WHERE (size($group_ids) = 0 OR r.group_id IN $group_ids)
                           AND any(term IN $terms WHERE toLower(r.fact) CONTAINS term
                                   OR toLower(r.name) CONTAINS term)
                         RETURN r, s.uuid AS source, t.uuid AS target
                         ORDER BY r.created_at DESC LIMIT $limit",
                    )
                    .param("group_ids", group_ids.to_vec())
                    .param("terms", candidates.terms.to_vec())
                    .param("limit", candidates.limit as i64),
                    "fact keyword match",
                )
                .await?;
            for row in &rows {
                let fact = Self::row_to_fact(row)?;
                if !facts.iter().any(|f| f.uuid == fact.uuid) {
                    facts.push(fact);
                }
            }
        }

        Ok(facts)
    }

    async fn recent_episodes(
        &self,
        group_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Episode>, AppError> {
        let rows = self
            .fetch(
                query(
                    "MATCH (e:Episodic)
                     WHERE $group_id IS NULL OR e.group_id = $group_id
                     RETURN e ORDER BY e.created_at DESC LIMIT $limit",
                )
                .param("group_id", group_id.map(str::to_string))
                .param("limit", limit as i64),
                "recent episodes",
            )
            .await?;

        rows.iter().map(Self::row_to_episode).collect()
    }

    async fn clear(&self, group_ids: &[String]) -> Result<ClearReport, AppError> {
        let mut txn = self.graph.start_txn().await?;
        match Self::clear_in(&mut txn, group_ids).await {
            Ok(report) => {
                txn.commit().await?;
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    tracing::warn!(error = %rollback, "Rollback after failed clear did not complete");
                }
                Err(e)
            }
        }
    }
}

fn query_error(err: neo4rs::Error, label: &str) -> AppError {
    AppError::Query {
        message: err.to_string(),
        query: label.to_string(),
    }
}

fn to_f64(vector: &[f32]) -> Vec<f64> {
    vector.iter().map(|&f| f64::from(f)).collect()
}

fn timestamp(stored: Option<String>) -> DateTime<Utc> {
    stored
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now)
}
