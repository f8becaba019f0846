//! Repair pipeline for structured model output.
//!
//! Steps, in order:
//! 1. parse the reply strictly, then try fenced code blocks, then the largest
//!    balanced `{...}`/`[...]` substring;
//! 2. find the record collection under its canonical key or an alias;
//! 3. per record, rename aliased fields, coerce values to the declared kind,
//!    resolve entity references and fill defaults from the schema table;
//! 4. deserialize each record into its typed form.
//!
//! Records that cannot be repaired are dropped individually. Only a reply
//! with no JSON in it at all is [`RepairOutcome::Unrecoverable`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::schema::{FieldDefault, FieldKind, FieldSpec, RecordSchema};

/// How a JSON value was recovered from non-JSON text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    FencedBlock,
    BalancedSubstring,
}

/// A single change made while repairing a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairNote {
    RecoveredJson(Recovery),
    CollectionAlias {
        key: String,
    },
    BareArray,
    /// The reply was one record rather than a collection.
    SingleRecord,
    MissingCollection,
    StringRecord {
        record: usize,
    },
    RenamedField {
        record: usize,
        from: String,
        to: &'static str,
    },
    CoercedValue {
        record: usize,
        field: &'static str,
        from: String,
    },
    ResolvedByName {
        record: usize,
        field: &'static str,
        name: String,
        id: i64,
    },
    SyntheticId {
        record: usize,
        field: &'static str,
        value: String,
        assigned: i64,
    },
    DefaultApplied {
        record: usize,
        field: &'static str,
    },
}

impl fmt::Display for RepairNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairNote::RecoveredJson(Recovery::FencedBlock) => {
                write!(f, "recovered JSON from a fenced code block")
            }
            RepairNote::RecoveredJson(Recovery::BalancedSubstring) => {
                write!(f, "recovered JSON from the largest balanced substring")
            }
            RepairNote::CollectionAlias { key } => write!(f, "collection found under '{key}'"),
            RepairNote::BareArray => write!(f, "reply was a bare array"),
            RepairNote::SingleRecord => write!(f, "reply was a single record"),
            RepairNote::MissingCollection => write!(f, "no collection in reply, using empty list"),
            RepairNote::StringRecord { record } => {
                write!(f, "record {record}: bare string promoted to record")
            }
            RepairNote::RenamedField { record, from, to } => {
                write!(f, "record {record}: renamed '{from}' to '{to}'")
            }
            RepairNote::CoercedValue {
                record,
                field,
                from,
            } => write!(f, "record {record}: coerced '{field}' from {from}"),
            RepairNote::ResolvedByName {
                record,
                field,
                name,
                id,
            } => write!(f, "record {record}: resolved '{field}' name '{name}' to {id}"),
            RepairNote::SyntheticId {
                record,
                field,
                value,
                assigned,
            } => write!(
                f,
                "record {record}: unresolvable '{field}' value '{value}', assigned {assigned}"
            ),
            RepairNote::DefaultApplied { record, field } => {
                write!(f, "record {record}: defaulted missing '{field}'")
            }
        }
    }
}

/// A record removed from the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedRecord {
    pub index: usize,
    pub reason: String,
}

/// Result of repairing one reply.
#[derive(Debug, Clone)]
pub enum RepairOutcome<T> {
    Complete {
        records: Vec<T>,
        notes: Vec<RepairNote>,
    },
    Partial {
        records: Vec<T>,
        dropped: Vec<DroppedRecord>,
        notes: Vec<RepairNote>,
    },
    Unrecoverable {
        reason: String,
    },
}

impl<T> RepairOutcome<T> {
    pub fn records(&self) -> &[T] {
        match self {
            RepairOutcome::Complete { records, .. } | RepairOutcome::Partial { records, .. } => {
                records
            }
            RepairOutcome::Unrecoverable { .. } => &[],
        }
    }

    pub fn into_records(self) -> Vec<T> {
        match self {
            RepairOutcome::Complete { records, .. } | RepairOutcome::Partial { records, .. } => {
                records
            }
            RepairOutcome::Unrecoverable { .. } => Vec::new(),
        }
    }

    pub fn dropped(&self) -> &[DroppedRecord] {
        match self {
            RepairOutcome::Partial { dropped, .. } => dropped,
            _ => &[],
        }
    }

    pub fn notes(&self) -> &[RepairNote] {
        match self {
            RepairOutcome::Complete { notes, .. } | RepairOutcome::Partial { notes, .. } => notes,
            RepairOutcome::Unrecoverable { .. } => &[],
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, RepairOutcome::Complete { .. })
    }
}

/// Names of entities already extracted, by position.
///
/// Used to resolve edge endpoints given by name instead of id.
#[derive(Debug, Clone, Default)]
pub struct RepairContext {
    known_entities: Vec<String>,
}

impl RepairContext {
    pub fn with_entities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_entities: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.known_entities
            .iter()
            .position(|known| known.trim().eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.known_entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known_entities.is_empty()
    }
}

/// Repair `raw` into typed records according to `schema`.
pub fn repair_response<T: DeserializeOwned>(
    raw: &str,
    schema: &RecordSchema,
    context: &RepairContext,
) -> RepairOutcome<T> {
    let mut notes = Notes::default();

    let Some(value) = recover_json(raw, &mut notes) else {
        let reason = if raw.trim().is_empty() {
            "empty response".to_string()
        } else {
            "no JSON value found in response".to_string()
        };
        tracing::warn!(collection = schema.collection, %reason, "Unrecoverable model reply");
        return RepairOutcome::Unrecoverable { reason };
    };

    let items = locate_collection(value, schema, &mut notes, 0);

    // Synthetic ids start past the known range so they never resolve.
    let mut synthetic = context.len() as i64;
    let mut records = Vec::with_capacity(items.len());
    let mut dropped = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        let repaired = repair_record(index, item, schema, context, &mut synthetic, &mut notes)
            .and_then(|map| {
                serde_json::from_value::<T>(Value::Object(map)).map_err(|e| e.to_string())
            });
        match repaired {
            Ok(record) => records.push(record),
            Err(reason) => {
                tracing::warn!(
                    collection = schema.collection,
                    record = index,
                    %reason,
                    "Dropped record"
                );
                dropped.push(DroppedRecord { index, reason });
            }
        }
    }

    let notes = notes.0;
    if dropped.is_empty() {
        RepairOutcome::Complete { records, notes }
    } else {
        RepairOutcome::Partial {
            records,
            dropped,
            notes,
        }
    }
}

/// Collects notes, emitting one event per repair action.
#[derive(Default)]
struct Notes(Vec<RepairNote>);

impl Notes {
    fn push(&mut self, note: RepairNote) {
        tracing::debug!(action = %note, "Repaired model output");
        self.0.push(note);
    }
}

fn recover_json(raw: &str, notes: &mut Notes) -> Option<Value> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    for block in fenced_blocks(text) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            notes.push(RepairNote::RecoveredJson(Recovery::FencedBlock));
            return Some(value);
        }
    }

    let value = largest_balanced(text)?;
    notes.push(RepairNote::RecoveredJson(Recovery::BalancedSubstring));
    Some(value)
}

/// Contents of ```` ``` ```` fences, language tag stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    text.split("```")
        .skip(1)
        .step_by(2)
        .map(|block| match block.split_once('\n') {
            Some((tag, rest)) if !tag.contains(['{', '[']) => rest.trim(),
            _ => block.trim(),
        })
        .collect()
}

/// Longest `{...}` or `[...]` substring that parses.
fn largest_balanced(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut spans: Vec<(usize, usize)> = bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'{' || b == b'[')
        .filter_map(|(start, _)| balanced_end(bytes, start).map(|end| (start, end)))
        .collect();

    spans.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));

    // Delimiters are ASCII, so span bounds are char boundaries.
    spans
        .into_iter()
        .find_map(|(start, end)| serde_json::from_str::<Value>(&text[start..end]).ok())
}

/// End (exclusive) of the bracket group opened at `start`, string-aware.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut expected = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(b) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn locate_collection(
    value: Value,
    schema: &RecordSchema,
    notes: &mut Notes,
    depth: usize,
) -> Vec<Value> {
    match value {
        Value::Array(items) => {
            notes.push(RepairNote::BareArray);
            items
        }
        Value::Object(mut map) => {
            let key = map.keys().find(|k| schema.is_collection_key(k)).cloned();
            if let Some(key) = key {
                if key != schema.collection {
                    notes.push(RepairNote::CollectionAlias { key: key.clone() });
                }
                return match map.remove(&key) {
                    Some(Value::Array(items)) => items,
                    Some(record @ Value::Object(_)) => {
                        notes.push(RepairNote::SingleRecord);
                        vec![record]
                    }
                    Some(text @ Value::String(_)) if schema.bare_string_field.is_some() => {
                        vec![text]
                    }
                    _ => {
                        notes.push(RepairNote::MissingCollection);
                        Vec::new()
                    }
                };
            }

            if map.keys().any(|k| schema.is_field_key(k)) {
                notes.push(RepairNote::SingleRecord);
                return vec![Value::Object(map)];
            }

            // One level of wrapping, e.g. {"result": {"entities": [...]}}.
            if depth == 0 {
                let wrapped = map.into_iter().find(|(_, v)| {
                    v.as_object()
                        .is_some_and(|inner| inner.keys().any(|k| schema.is_collection_key(k)))
                });
                if let Some((_, inner)) = wrapped {
                    return locate_collection(inner, schema, notes, depth + 1);
                }
            }

            notes.push(RepairNote::MissingCollection);
            Vec::new()
        }
        text @ Value::String(_) if schema.bare_string_field.is_some() => vec![text],
        _ => {
            notes.push(RepairNote::MissingCollection);
            Vec::new()
        }
    }
}

fn repair_record(
    index: usize,
    item: Value,
    schema: &RecordSchema,
    context: &RepairContext,
    synthetic: &mut i64,
    notes: &mut Notes,
) -> Result<Map<String, Value>, String> {
    let mut source = match item {
        Value::Object(map) => map,
        Value::String(text) => match schema.bare_string_field {
            Some(field) => {
                notes.push(RepairNote::StringRecord { record: index });
                Map::from_iter([(field.to_string(), Value::String(text))])
            }
            None => return Err("record is a bare string".to_string()),
        },
        other => return Err(format!("record is {}, not an object", json_type(&other))),
    };

    let mut record = Map::new();
    for field in schema.fields {
        let coerced = take_field(&mut source, field, index, notes)
            .filter(|v| !v.is_null())
            .and_then(|v| coerce(index, field, v, context, synthetic, notes));

        let value = match coerced {
            Some(value) => value,
            None => {
                let value = match field.default {
                    FieldDefault::Required => {
                        return Err(format!("missing required field '{}'", field.name))
                    }
                    FieldDefault::Empty => empty_value(field.kind),
                    FieldDefault::Literal(text) => Value::String(text.to_string()),
                    FieldDefault::CopyOf(other) => record
                        .get(other)
                        .cloned()
                        .unwrap_or_else(|| empty_value(field.kind)),
                };
                notes.push(RepairNote::DefaultApplied {
                    record: index,
                    field: field.name,
                });
                value
            }
        };
        record.insert(field.name.to_string(), value);
    }

    Ok(record)
}

/// Remove a field by canonical name, case variant, or alias.
fn take_field(
    source: &mut Map<String, Value>,
    field: &FieldSpec,
    index: usize,
    notes: &mut Notes,
) -> Option<Value> {
    if let Some(value) = source.remove(field.name) {
        return Some(value);
    }

    let key = source
        .keys()
        .find(|k| {
            k.eq_ignore_ascii_case(field.name)
                || field.aliases.iter().any(|a| k.eq_ignore_ascii_case(a))
        })
        .cloned()?;
    let value = source.remove(&key)?;
    notes.push(RepairNote::RenamedField {
        record: index,
        from: key,
        to: field.name,
    });
    Some(value)
}

/// Convert `value` to the field's kind; `None` when it is unusable.
fn coerce(
    index: usize,
    field: &FieldSpec,
    value: Value,
    context: &RepairContext,
    synthetic: &mut i64,
    notes: &mut Notes,
) -> Option<Value> {
    let coerced = |notes: &mut Notes, from: &Value| {
        notes.push(RepairNote::CoercedValue {
            record: index,
            field: field.name,
            from: json_type(from).to_string(),
        })
    };

    match field.kind {
        FieldKind::Text => match value {
            Value::String(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| Value::String(text.to_string()))
            }
            Value::Number(_) | Value::Bool(_) => {
                coerced(notes, &value);
                Some(Value::String(value.to_string()))
            }
            Value::Array(ref items) => {
                let parts: Vec<String> = items.iter().filter_map(scalar_text).collect();
                if parts.is_empty() {
                    return None;
                }
                coerced(notes, &value);
                Some(Value::String(parts.join(", ")))
            }
            _ => None,
        },

        FieldKind::Integer => {
            let number = integer_value(&value)?;
            if !value.is_i64() {
                coerced(notes, &value);
            }
            Some(Value::from(number))
        }

        FieldKind::EntityRef => {
            if let Some(number) = integer_value(&value) {
                if !value.is_i64() {
                    coerced(notes, &value);
                }
                return Some(Value::from(number));
            }
            let text = match &value {
                Value::String(text) => text.trim().to_string(),
                Value::Object(map) => {
                    // {"id": 2} or {"name": "Alice"}
                    let inner = ["id", "entity_id", "name"]
                        .iter()
                        .find_map(|k| map.get(*k))
                        .cloned()?;
                    return coerce(index, field, inner, context, synthetic, notes);
                }
                _ => return None,
            };
            if text.is_empty() {
                return None;
            }

            if let Some(id) = context.lookup(&text) {
                let id = id as i64;
                notes.push(RepairNote::ResolvedByName {
                    record: index,
                    field: field.name,
                    name: text,
                    id,
                });
                return Some(Value::from(id));
            }
            if let Some(id) = trailing_number(&text) {
                coerced(notes, &value);
                return Some(Value::from(id));
            }

            let assigned = *synthetic;
            *synthetic += 1;
            notes.push(RepairNote::SyntheticId {
                record: index,
                field: field.name,
                value: text,
                assigned,
            });
            Some(Value::from(assigned))
        }

        FieldKind::TextList => match value {
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(scalar_text)
                    .map(Value::String)
                    .collect(),
            )),
            Value::String(ref text) if !text.trim().is_empty() => {
                coerced(notes, &value);
                Some(Value::Array(vec![Value::String(text.trim().to_string())]))
            }
            _ => None,
        },
    }
}

/// Integers pass, integral floats and numeric strings truncate.
fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f.trunc() as i64)
        }),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// `"ENTITY_3"` and `"entity 3"` yield 3.
fn trailing_number(text: &str) -> Option<i64> {
    let digits_start = text
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    text[digits_start..].parse().ok()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(_) | Value::Bool(_) => Some(value.to_string()),
        _ => None,
    }
}

fn empty_value(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Text => Value::String(String::new()),
        FieldKind::Integer | FieldKind::EntityRef => Value::from(0),
        FieldKind::TextList => Value::Array(Vec::new()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
