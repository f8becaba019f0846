//! Chat model access and structured-output repair.
//!
//! Local models frequently return JSON that is wrapped in prose, truncated,
//! or keyed differently from what was asked for. [`generate_structured`]
//! sends a chat request in JSON mode and runs the reply through the
//! [`repair`] pipeline, so callers always receive typed records or a
//! [`RepairOutcome::Unrecoverable`] verdict, never a parse error.

mod ollama;
pub mod prompts;
pub mod repair;
pub mod schema;

pub use ollama::OllamaClient;
pub use repair::{DroppedRecord, RepairContext, RepairNote, RepairOutcome};
pub use schema::{ExtractedEdge, ExtractedEntity, RecordSchema, EDGE_SCHEMA, ENTITY_SCHEMA};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a chat request produced no text at all.
///
/// Malformed content inside a successful reply is not a failure; it goes
/// through repair instead.
#[derive(Error, Debug)]
pub enum ExtractionFailure {
    #[error("chat request failed: {0}")]
    Request(String),

    #[error("chat request timed out")]
    Timeout,

    #[error("chat server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("chat response unreadable: {0}")]
    UnreadableResponse(String),
}

/// Chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A chat completion service.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `messages` and return the reply text.
    ///
    /// With `json_mode` the server is asked to constrain output to JSON.
    async fn chat(&self, messages: &[Message], json_mode: bool) -> Result<String, ExtractionFailure>;

    /// Model identifier for status reporting.
    fn model(&self) -> &str;
}

/// Request structured output and repair it into typed records.
pub async fn generate_structured<T: DeserializeOwned>(
    client: &dyn LlmClient,
    messages: &[Message],
    schema: &RecordSchema,
    context: &RepairContext,
) -> Result<RepairOutcome<T>, ExtractionFailure> {
    let raw = client.chat(messages, true).await?;
    tracing::debug!(
        collection = schema.collection,
        chars = raw.len(),
        "Received structured response"
    );
    Ok(repair::repair_response(&raw, schema, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedClient(&'static str);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn chat(&self, _: &[Message], json_mode: bool) -> Result<String, ExtractionFailure> {
            assert!(json_mode);
            Ok(self.0.to_string())
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_value(Message::system("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "hi"}));
    }

    #[tokio::test]
    async fn test_generate_structured_repairs_reply() {
        let client = CannedClient("Sure! ```json\n{\"entities\": [{\"entity_name\": \"Rust\"}]}\n```");
        let outcome: RepairOutcome<ExtractedEntity> = generate_structured(
            &client,
            &[Message::user("extract")],
            &ENTITY_SCHEMA,
            &RepairContext::default(),
        )
        .await
        .unwrap();

        let records = outcome.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Rust");
    }
}
