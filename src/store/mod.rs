//! Storage abstraction.
//!
//! The [`Store`] trait covers every read and write the pipeline, search and
//! health surfaces need, so they can run against Postgres/pgvector
//! ([`postgres::PgStore`]) in production and [`memory::InMemoryStore`] in
//! tests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`document_hash`](Store::document_hash) | Stored content hash for a path |
//! | [`upsert_document`](Store::upsert_document) | Insert or update a document by path |
//! | [`clear_document_hash`](Store::clear_document_hash) | Force a reprocess on the next pass |
//! | [`delete_chunks`](Store::delete_chunks) | Drop every chunk of a document |
//! | [`insert_chunk`](Store::insert_chunk) | Write one chunk with its vector |
//! | [`semantic_search`](Store::semantic_search) | Cosine-similarity search |
//! | [`fulltext_search`](Store::fulltext_search) | Ranked full-text search |
//! | [`stats`](Store::stats) | Document/chunk counts |
//! | [`ping`](Store::ping) | Connectivity check |

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, NewDocument, ScoredChunk, StoreStats};

#[async_trait]
pub trait Store: Send + Sync {
    /// The `file_hash` recorded for `file_path`, if the document exists and
    /// has one.
    async fn document_hash(&self, file_path: &str) -> Result<Option<String>>;

    /// Insert or update the document keyed by `file_path`; returns its id.
    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64>;

    async fn clear_document_hash(&self, document_id: i64) -> Result<()>;

    /// Returns the number of chunks removed.
    async fn delete_chunks(&self, document_id: i64) -> Result<u64>;

    async fn insert_chunk(&self, document_id: i64, chunk: &Chunk, embedding: &[f32]) -> Result<()>;

    /// Chunks by descending `1 - cosine_distance`. With `min_similarity`,
    /// weaker matches are dropped.
    async fn semantic_search(
        &self,
        query_vec: &[f32],
        min_similarity: Option<f64>,
        limit: i64,
    ) -> Result<Vec<ScoredChunk>>;

    /// Chunks matching every query term, by descending text rank.
    async fn fulltext_search(&self, query: &str, limit: i64) -> Result<Vec<ScoredChunk>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn ping(&self) -> Result<()>;
}
