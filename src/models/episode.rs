//! Episode model: one stored unit of memory text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::generate_ulid;

/// A stored memory. Immutable once saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub uuid: String,
    pub name: String,
    /// Episode body.
    pub content: String,
    pub group_id: String,
    pub source: String,
    pub source_description: String,
    pub created_at: DateTime<Utc>,
    /// When the content was true (reference time).
    pub valid_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(
        name: String,
        content: String,
        group_id: String,
        source_description: String,
        valid_at: Option<DateTime<Utc>>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            uuid: generate_ulid(),
            name,
            content,
            group_id,
            source: "text".to_string(),
            source_description,
            created_at,
            valid_at: valid_at.unwrap_or(created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_at_defaults_to_creation() {
        let episode = Episode::new("n".into(), "body".into(), "g".into(), "MCP Server".into(), None);
        assert_eq!(episode.valid_at, episode.created_at);
        assert_eq!(episode.source, "text");
    }
}
