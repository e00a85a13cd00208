//! Tantivy schema for chunk records.

use tantivy::schema::{Field, STORED, STRING, Schema, SchemaBuilder};

/// Separator between key and value in `meta_terms` entries.
pub(crate) const META_TERM_SEPARATOR: char = '\u{1f}';

/// Schema fields for chunk storage.
#[derive(Debug)]
pub struct ChunkSchema {
    /// Unique chunk id, indexed for exact lookup and deletion.
    pub chunk_id: Field,

    /// Chunk text.
    pub content: Field,

    /// Full metadata as a JSON object (type-preserving).
    pub metadata_json: Field,

    /// One `key<US>tag:value` term per metadata entry, for exact filtering.
    pub meta_terms: Field,

    /// Embedding as a JSON array of floats.
    pub vector_json: Field,
}

impl ChunkSchema {
    pub fn build() -> (Schema, Self) {
        let mut builder = SchemaBuilder::default();

        let chunk_id = builder.add_text_field("chunk_id", STRING | STORED);
        let content = builder.add_text_field("content", STORED);
        let metadata_json = builder.add_text_field("metadata_json", STORED);
        // Multi-valued, not stored: rebuilt from metadata_json on read
        let meta_terms = builder.add_text_field("meta_terms", STRING);
        let vector_json = builder.add_text_field("vector_json", STORED);

        let schema = builder.build();

        let chunk_schema = Self {
            chunk_id,
            content,
            metadata_json,
            meta_terms,
            vector_json,
        };

        (schema, chunk_schema)
    }
}

/// Index term for one metadata condition.
pub(crate) fn meta_term(key: &str, term_repr: &str) -> String {
    format!("{key}{META_TERM_SEPARATOR}{term_repr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_fields() {
        let (schema, fields) = ChunkSchema::build();
        assert_eq!(schema.get_field("chunk_id").unwrap(), fields.chunk_id);
        assert_eq!(schema.get_field("meta_terms").unwrap(), fields.meta_terms);
        assert_eq!(schema.fields().count(), 5);
    }

    #[test]
    fn test_meta_term_keeps_keys_apart() {
        // Colons in keys or values must not blur the key boundary
        assert_ne!(meta_term("a", "s:b:c"), meta_term("a:s", "b:c"));
    }
}
