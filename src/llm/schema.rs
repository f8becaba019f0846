//! Declarative field tables for extraction records.
//!
//! Each [`RecordSchema`] lists the canonical fields of one record type, the
//! alternative names local models tend to use for them, and what to
//! substitute when a field is missing. The repair pipeline and the prompt
//! hint are both driven by these tables.

use serde::{Deserialize, Serialize};

/// Value shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    /// Reference to an entity by position in the extracted entity list.
    EntityRef,
    TextList,
}

/// What to do when a field is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    /// Drop the record.
    Required,
    /// `""`, `0` or `[]` depending on the kind.
    Empty,
    Literal(&'static str),
    /// Copy the (already repaired) value of another field.
    CopyOf(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub aliases: &'static [&'static str],
    pub default: FieldDefault,
    pub description: &'static str,
}

/// One structured-output contract.
#[derive(Debug, Clone, Copy)]
pub struct RecordSchema {
    /// Canonical key of the record array.
    pub collection: &'static str,
    pub collection_aliases: &'static [&'static str],
    /// Fields in repair order; `CopyOf` sources must come first.
    pub fields: &'static [FieldSpec],
    /// Field populated when the model answers with a bare string.
    pub bare_string_field: Option<&'static str>,
}

impl RecordSchema {
    /// Whether `key` names the collection (case-insensitive).
    pub fn is_collection_key(&self, key: &str) -> bool {
        key.eq_ignore_ascii_case(self.collection)
            || self
                .collection_aliases
                .iter()
                .any(|alias| key.eq_ignore_ascii_case(alias))
    }

    /// Whether `key` names any field or field alias.
    pub fn is_field_key(&self, key: &str) -> bool {
        self.fields.iter().any(|f| {
            key.eq_ignore_ascii_case(f.name) || f.aliases.iter().any(|a| key.eq_ignore_ascii_case(a))
        })
    }

    /// Output-format instruction for prompts, generated from the field table.
    pub fn hint(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                let shape = match f.kind {
                    FieldKind::Text => "string",
                    FieldKind::Integer | FieldKind::EntityRef => "integer",
                    FieldKind::TextList => "array of strings",
                };
                let required = if f.default == FieldDefault::Required {
                    ", required"
                } else {
                    ""
                };
                format!("  \"{}\": {}{} - {}", f.name, shape, required, f.description)
            })
            .collect();

        format!(
            "Respond with a single JSON object of the form {{\"{}\": [ ... ]}} where each element has:\n{}",
            self.collection,
            fields.join("\n")
        )
    }
}

/// Entity type ids offered to the model, indexed by id.
pub const ENTITY_TYPES: &[&str] = &[
    "Person",
    "Organization",
    "Technology",
    "Concept",
    "Place",
    "Other",
];

/// Label for an entity type id; out-of-range ids map to `Other`.
pub fn entity_type_label(id: i64) -> &'static str {
    usize::try_from(id)
        .ok()
        .and_then(|i| ENTITY_TYPES.get(i))
        .copied()
        .unwrap_or("Other")
}

pub const ENTITY_SCHEMA: RecordSchema = RecordSchema {
    collection: "extracted_entities",
    collection_aliases: &[
        "entities",
        "extracted_nodes",
        "nodes",
        "entity_list",
        "實體",
        "实体",
    ],
    fields: &[
        FieldSpec {
            name: "name",
            kind: FieldKind::Text,
            aliases: &["entity_name", "entity", "title", "node_name"],
            default: FieldDefault::Required,
            description: "the entity's name as written in the text",
        },
        FieldSpec {
            name: "entity_type_id",
            kind: FieldKind::Integer,
            aliases: &["type_id", "entity_type_index"],
            default: FieldDefault::Empty,
            description: "0=Person, 1=Organization, 2=Technology, 3=Concept, 4=Place, 5=Other",
        },
        FieldSpec {
            name: "summary",
            kind: FieldKind::Text,
            aliases: &["entity_summary", "description", "observation", "observations"],
            default: FieldDefault::Empty,
            description: "one sentence about the entity drawn from the text",
        },
    ],
    bare_string_field: Some("name"),
};

pub const EDGE_SCHEMA: RecordSchema = RecordSchema {
    collection: "edges",
    collection_aliases: &[
        "extracted_edges",
        "relationships",
        "relations",
        "facts",
        "關係",
        "关系",
    ],
    fields: &[
        FieldSpec {
            name: "source_entity_id",
            kind: FieldKind::EntityRef,
            aliases: &["source_id", "subject_id", "source", "subject", "from"],
            default: FieldDefault::Required,
            description: "id of the subject entity, e.g. 0 for ENTITY_0",
        },
        FieldSpec {
            name: "target_entity_id",
            kind: FieldKind::EntityRef,
            aliases: &["target_id", "object_id", "target", "object", "to"],
            default: FieldDefault::Required,
            description: "id of the object entity",
        },
        FieldSpec {
            name: "relation_type",
            kind: FieldKind::Text,
            aliases: &["relationship", "predicate", "relation", "type"],
            default: FieldDefault::Literal("RELATES_TO"),
            description: "short SCREAMING_SNAKE_CASE relation name, e.g. USES",
        },
        FieldSpec {
            name: "fact",
            kind: FieldKind::Text,
            aliases: &["description", "fact_text", "statement"],
            default: FieldDefault::CopyOf("relation_type"),
            description: "the relationship restated as a sentence",
        },
    ],
    bare_string_field: None,
};

/// An entity as returned by the extraction prompt, after repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type_id: i64,
    pub summary: String,
}

/// A relationship between two extracted entities, after repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEdge {
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    pub relation_type: String,
    pub fact: String,
}
