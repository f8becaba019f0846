//! Prompt templates for the two-pass extraction.

use super::schema::{RecordSchema, EDGE_SCHEMA, ENTITY_SCHEMA, ENTITY_TYPES};
use super::Message;

const ENTITY_SYSTEM: &str = r#"You are an entity extraction assistant. Extract every significant entity mentioned in the text: people, organizations, technologies, concepts and places.

Rules:
1. Each entity appears once, under the name used in the text.
2. Do not extract dates, times or pronouns as entities.
3. Respond with valid JSON only, no commentary."#;

const EDGE_SYSTEM: &str = r#"You are a relationship extraction assistant. Given a text and a numbered list of entities found in it, extract the facts that connect two of those entities.

Rules:
1. Refer to entities only by their numeric id from the list.
2. Source and target must be different entities.
3. Only state facts supported by the text.
4. Respond with valid JSON only, no commentary."#;

/// Episode text plus metadata passed into both prompts.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeText<'a> {
    pub content: &'a str,
    pub source_description: &'a str,
    pub reference_time: &'a str,
}

fn system_prompt(base: &str, schema: &RecordSchema) -> String {
    format!("{base}\n\n{}", schema.hint())
}

/// Messages for the entity pass.
pub fn extract_entities(episode: EpisodeText<'_>) -> Vec<Message> {
    let types = ENTITY_TYPES
        .iter()
        .enumerate()
        .map(|(id, name)| format!("{id}={name}"))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        Message::system(system_prompt(ENTITY_SYSTEM, &ENTITY_SCHEMA)),
        Message::user(format!(
            "Entity types: {types}\n\
             Source: {}\n\
             Reference time: {}\n\n\
             <TEXT>\n{}\n</TEXT>",
            episode.source_description, episode.reference_time, episode.content
        )),
    ]
}

/// Messages for the relationship pass over already-extracted `entities`.
///
/// Entities are listed as `ENTITY_<i>` so ids line up with list positions.
pub fn extract_edges(episode: EpisodeText<'_>, entities: &[String]) -> Vec<Message> {
    let listing = entities
        .iter()
        .enumerate()
        .map(|(i, name)| format!("ENTITY_{i}: {name}"))
        .collect::<Vec<_>>()
        .join("\n");

    vec![
        Message::system(system_prompt(EDGE_SYSTEM, &EDGE_SCHEMA)),
        Message::user(format!(
            "Reference time: {}\n\n\
             <ENTITIES>\n{listing}\n</ENTITIES>\n\n\
             <TEXT>\n{}\n</TEXT>",
            episode.reference_time, episode.content
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    fn episode() -> EpisodeText<'static> {
        EpisodeText {
            content: "Alice uses Rust",
            source_description: "chat",
            reference_time: "2024-01-01T00:00:00Z",
        }
    }

    #[test]
    fn test_entity_prompt_carries_text_and_schema() {
        let messages = extract_entities(episode());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("extracted_entities"));
        assert!(messages[1].content.contains("Alice uses Rust"));
        assert!(messages[1].content.contains("2=Technology"));
    }

    #[test]
    fn test_edge_prompt_numbers_entities() {
        let messages = extract_edges(episode(), &["Alice".to_string(), "Rust".to_string()]);
        assert!(messages[1].content.contains("ENTITY_0: Alice"));
        assert!(messages[1].content.contains("ENTITY_1: Rust"));
        assert!(messages[0].content.contains("source_entity_id"));
    }
}
