//! Core data models shared by the chunker, the ingestion pipeline, the
//! stores and the search surfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping stored alongside each document row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// SHA-256 of the file bytes. `None` forces a reprocess on the next pass.
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub last_modified: f64,
    #[serde(default)]
    pub processed_at: f64,
}

/// A document about to be written. `file_path` is the unique key.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_path: String,
    pub title: String,
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Whether a chunk holds a whole section or one piece of a split section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    #[default]
    CompleteSection,
    SectionPart,
}

/// Per-chunk metadata. Missing fields decode to their defaults so rows
/// written by older processors still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub header_level: u8,
    #[serde(default)]
    pub chunk_type: ChunkType,
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub total_chunks: usize,
}

/// A chunk produced by [`crate::chunk::chunk_markdown`].
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub chunk_index: i64,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A chunk row returned by a store query, with the score of that query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: i64,
    pub document_id: i64,
    pub file_path: String,
    pub title: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub documents: i64,
    pub chunks: i64,
    pub last_update: Option<DateTime<Utc>>,
    pub avg_chunk_words: Option<f64>,
}

/// One search hit as returned to API and CLI callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_path: String,
    pub title: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub similarity: f64,
}

impl From<ScoredChunk> for SearchHit {
    fn from(c: ScoredChunk) -> Self {
        Self {
            file_path: c.file_path,
            title: c.title,
            content: c.content,
            metadata: c.metadata,
            similarity: c.score,
        }
    }
}

/// Body of `GET /search/{mode}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
    pub query: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_metadata_tolerates_missing_fields() {
        let meta: ChunkMetadata = serde_json::from_str(r#"{"header": "Intro"}"#).unwrap();
        assert_eq!(meta.header, "Intro");
        assert_eq!(meta.chunk_type, ChunkType::CompleteSection);
        assert_eq!(meta.size, 0);
    }

    #[test]
    fn chunk_type_uses_snake_case_tags() {
        let json = serde_json::to_string(&ChunkType::SectionPart).unwrap();
        assert_eq!(json, "\"section_part\"");
    }
}
