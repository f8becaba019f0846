//! Entity nodes and the facts connecting them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::generate_ulid;

/// A named entity extracted from one or more episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    /// Unique identifier (ULID).
    pub uuid: String,
    pub name: String,
    pub group_id: String,
    pub summary: String,
    /// Always contains `Entity` plus the extracted type label.
    pub labels: Vec<String>,
    /// Unit vector of the name (internal, not serialized).
    #[serde(skip_serializing)]
    pub name_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl EntityNode {
    pub fn new(name: String, group_id: String, summary: String, type_label: &str) -> Self {
        let mut labels = vec!["Entity".to_string()];
        if !type_label.is_empty() && type_label != "Entity" {
            labels.push(type_label.to_string());
        }
        Self {
            uuid: generate_ulid(),
            name,
            group_id,
            summary,
            labels,
            name_embedding: None,
            created_at: Utc::now(),
        }
    }

    /// Key used for exact-name deduplication within a group.
    pub fn dedupe_key(&self) -> String {
        normalize_name(&self.name)
    }
}

/// A fact: a typed, described relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEdge {
    pub uuid: String,
    pub source_node_uuid: String,
    pub target_node_uuid: String,
    /// Relation type, e.g. `USES`.
    pub name: String,
    pub fact: String,
    #[serde(skip_serializing)]
    pub fact_embedding: Option<Vec<f32>>,
    pub group_id: String,
    /// Episodes the fact was extracted from.
    pub episodes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub valid_at: Option<DateTime<Utc>>,
    pub invalid_at: Option<DateTime<Utc>>,
}

impl EntityEdge {
    pub fn new(
        source_node_uuid: String,
        target_node_uuid: String,
        name: String,
        fact: String,
        group_id: String,
        episode_uuid: String,
        valid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            uuid: generate_ulid(),
            source_node_uuid,
            target_node_uuid,
            name,
            fact,
            fact_embedding: None,
            group_id,
            episodes: vec![episode_uuid],
            created_at: Utc::now(),
            valid_at: Some(valid_at),
            invalid_at: None,
        }
    }
}

/// Lowercased, whitespace-collapsed name.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `uses`, `Works for`, `part-of` become `USES`, `WORKS_FOR`, `PART_OF`.
pub fn relation_name(raw: &str) -> String {
    let name = raw
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect::<String>();
    let name = name
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if name.is_empty() {
        "RELATES_TO".to_string()
    } else {
        name
    }
}
