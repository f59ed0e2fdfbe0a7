//! In-memory [`Store`] for tests and database-free runs.
//!
//! Everything lives behind one `RwLock`. Semantic search is brute-force
//! cosine similarity; full-text search requires every query term to appear
//! and ranks by term frequency over chunk length, which is close enough to
//! `ts_rank` for ordering purposes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Store;
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ChunkMetadata, DocumentMetadata, NewDocument, ScoredChunk, StoreStats};

struct StoredDoc {
    id: i64,
    title: String,
    metadata: DocumentMetadata,
    updated_at: DateTime<Utc>,
}

struct StoredChunk {
    id: i64,
    document_id: i64,
    content: String,
    metadata: ChunkMetadata,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, StoredDoc>,
    chunks: Vec<StoredChunk>,
    next_doc_id: i64,
    next_chunk_id: i64,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    chunk_inserts: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `insert_chunk` calls since creation.
    pub fn chunk_inserts(&self) -> u64 {
        self.chunk_inserts.load(Ordering::SeqCst)
    }

    /// Number of chunks currently stored for `file_path`.
    pub fn chunk_count_for(&self, file_path: &str) -> usize {
        let Ok(inner) = self.inner.read() else {
            return 0;
        };
        match inner.docs.get(file_path) {
            Some(doc) => inner.chunks.iter().filter(|c| c.document_id == doc.id).count(),
            None => 0,
        }
    }

    /// Stored title for `file_path`.
    pub fn title_for(&self, file_path: &str) -> Option<String> {
        let inner = self.inner.read().ok()?;
        inner.docs.get(file_path).map(|d| d.title.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn scored(inner: &Inner, chunk: &StoredChunk, score: f64) -> ScoredChunk {
    let (file_path, title) = inner
        .docs
        .iter()
        .find(|(_, d)| d.id == chunk.document_id)
        .map(|(path, d)| (path.clone(), d.title.clone()))
        .unwrap_or_default();

    ScoredChunk {
        chunk_id: chunk.id,
        document_id: chunk.document_id,
        file_path,
        title,
        content: chunk.content.clone(),
        metadata: chunk.metadata.clone(),
        score,
    }
}

fn rank(mut hits: Vec<ScoredChunk>, limit: i64) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(limit.max(0) as usize);
    hits
}

#[async_trait]
impl Store for InMemoryStore {
    async fn document_hash(&self, file_path: &str) -> Result<Option<String>> {
        let inner = self.read()?;
        Ok(inner
            .docs
            .get(file_path)
            .and_then(|d| d.metadata.file_hash.clone()))
    }

    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        let mut inner = self.write()?;
        if let Some(existing) = inner.docs.get_mut(&doc.file_path) {
            existing.title = doc.title.clone();
            existing.metadata = doc.metadata.clone();
            existing.updated_at = Utc::now();
            return Ok(existing.id);
        }

        inner.next_doc_id += 1;
        let id = inner.next_doc_id;
        inner.docs.insert(
            doc.file_path.clone(),
            StoredDoc {
                id,
                title: doc.title.clone(),
                metadata: doc.metadata.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn clear_document_hash(&self, document_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(doc) = inner.docs.values_mut().find(|d| d.id == document_id) {
            doc.metadata.file_hash = None;
        }
        Ok(())
    }

    async fn delete_chunks(&self, document_id: i64) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.chunks.len();
        inner.chunks.retain(|c| c.document_id != document_id);
        Ok((before - inner.chunks.len()) as u64)
    }

    async fn insert_chunk(&self, document_id: i64, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        let mut inner = self.write()?;
        inner.next_chunk_id += 1;
        let id = inner.next_chunk_id;
        inner.chunks.push(StoredChunk {
            id,
            document_id,
            content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
            vector: embedding.to_vec(),
        });
        self.chunk_inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn semantic_search(
        &self,
        query_vec: &[f32],
        min_similarity: Option<f64>,
        limit: i64,
    ) -> Result<Vec<ScoredChunk>> {
        let inner = self.read()?;
        let hits = inner
            .chunks
            .iter()
            .filter(|c| !c.vector.is_empty())
            .map(|c| (c, cosine_similarity(query_vec, &c.vector) as f64))
            .filter(|(_, sim)| min_similarity.map_or(true, |floor| *sim >= floor))
            .map(|(c, sim)| scored(&inner, c, sim))
            .collect();
        Ok(rank(hits, limit))
    }

    async fn fulltext_search(&self, query: &str, limit: i64) -> Result<Vec<ScoredChunk>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.read()?;
        let hits = inner
            .chunks
            .iter()
            .filter_map(|c| {
                let words = tokenize(&c.content);
                let mut matched = 0usize;
                for term in &terms {
                    let n = words.iter().filter(|w| *w == term).count();
                    if n == 0 {
                        return None;
                    }
                    matched += n;
                }
                Some(scored(&inner, c, matched as f64 / words.len() as f64))
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.read()?;
        let avg_chunk_words = if inner.chunks.is_empty() {
            None
        } else {
            let words: usize = inner
                .chunks
                .iter()
                .map(|c| c.content.split_whitespace().count())
                .sum();
            Some(words as f64 / inner.chunks.len() as f64)
        };

        Ok(StoreStats {
            documents: inner.docs.len() as i64,
            chunks: inner.chunks.len() as i64,
            last_update: inner.docs.values().map(|d| d.updated_at).max(),
            avg_chunk_words,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }
}
