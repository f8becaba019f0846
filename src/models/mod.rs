//! Domain models for the memory graph.

mod entity;
mod episode;

pub use entity::{normalize_name, relation_name, EntityEdge, EntityNode};
pub use episode::Episode;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use ulid::Ulid;

/// Generates a new ULID string.
pub fn generate_ulid() -> String {
    Ulid::new().to_string()
}

/// RFC 3339 with microseconds and `Z`, so lexical order is chronological.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored or user-supplied RFC 3339 timestamp.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A search hit with its fused ranking score.
#[derive(Debug, Clone, Serialize)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let (fa, fb) = (format_timestamp(&a), format_timestamp(&b));
        assert_eq!(fa, "2024-01-02T03:04:05.000000Z");
        assert!(fa < fb);
        assert_eq!(parse_timestamp(&fb), Some(b));
    }

    #[test]
    fn test_parse_offset_timestamp() {
        let parsed = parse_timestamp("2024-05-01T10:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(&parsed), "2024-05-01T08:00:00.000000Z");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
