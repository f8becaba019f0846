//! Neo4j constraints and indexes for the memory graph.

/// Uniqueness constraints, applied first.
pub const CONSTRAINTS: &[&str] = &[
    "CREATE CONSTRAINT episodic_uuid IF NOT EXISTS FOR (e:Episodic) REQUIRE e.uuid IS UNIQUE",
    "CREATE CONSTRAINT entity_uuid IF NOT EXISTS FOR (n:Entity) REQUIRE n.uuid IS UNIQUE",
];

/// Range indexes backing group filters, name lookup and recency ordering.
pub const INDEXES: &[&str] = &[
    "CREATE INDEX episodic_group_created IF NOT EXISTS FOR (e:Episodic) ON (e.group_id, e.created_at)",
    "CREATE INDEX entity_group_name IF NOT EXISTS FOR (n:Entity) ON (n.group_id, n.name_key)",
    "CREATE INDEX entity_created IF NOT EXISTS FOR (n:Entity) ON (n.created_at)",
    "CREATE INDEX relates_to_uuid IF NOT EXISTS FOR ()-[r:RELATES_TO]-() ON (r.uuid)",
    "CREATE INDEX relates_to_group IF NOT EXISTS FOR ()-[r:RELATES_TO]-() ON (r.group_id)",
];

/// Vector index over `Entity.name_embedding`.
pub const ENTITY_VECTOR_INDEX: &str = "entity_name_embedding";

/// Vector index over `RELATES_TO.fact_embedding`.
pub const FACT_VECTOR_INDEX: &str = "fact_embedding";

/// Vector indexes; older servers reject these, which is not fatal.
pub fn vector_indexes(dimensions: usize) -> Vec<String> {
    [
        (ENTITY_VECTOR_INDEX, "(n:Entity) ON n.name_embedding"),
        (FACT_VECTOR_INDEX, "()-[r:RELATES_TO]-() ON r.fact_embedding"),
    ]
    .iter()
    .map(|(name, target)| {
        format!(
            "CREATE VECTOR INDEX {name} IF NOT EXISTS FOR {target} \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {dimensions}, `vector.similarity_function`: 'cosine'}}}}"
        )
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_index_dimensions() {
        let statements = vector_indexes(768);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("`vector.dimensions`: 768"));
        assert!(statements[1].contains("r.fact_embedding"));
    }

    #[test]
    fn test_statements_are_idempotent() {
        for statement in CONSTRAINTS.iter().chain(INDEXES) {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
    }
}
