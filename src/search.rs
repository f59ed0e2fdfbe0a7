//! Semantic, full-text and hybrid search over stored chunks.
//!
//! | Mode | Ranking |
//! |------|---------|
//! | `semantic` | `1 - cosine_distance` to the query embedding, floored at `search.similarity_threshold` |
//! | `fulltext` | store text rank (`ts_rank` over `plainto_tsquery('english', q)`) |
//! | `hybrid` | `0.7 × semantic + 0.3 × fulltext`, outer-joined on chunk id |
//!
//! Hybrid fetches the top `limit` from each channel independently (the
//! semantic side without a floor), so a chunk found by only one channel
//! keeps just that channel's weighted contribution.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::config::SearchConfig;
use crate::embedding::{embed_query, EmbeddingError, EmbeddingProvider};
use crate::models::{ScoredChunk, SearchHit};
use crate::store::Store;

pub const SEMANTIC_WEIGHT: f64 = 0.7;
pub const FULLTEXT_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Fulltext,
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(SearchMode::Semantic),
            "fulltext" => Ok(SearchMode::Fulltext),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(SearchError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchMode::Semantic => "semantic",
            SearchMode::Fulltext => "fulltext",
            SearchMode::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Unknown search mode: {0}. Use semantic, fulltext, or hybrid.")]
    UnknownMode(String),
    #[error("{0}")]
    InvalidQuery(String),
    #[error("Failed to generate embedding: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Search failed: {0}")]
    Store(#[from] anyhow::Error),
}

pub struct SearchService {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    similarity_threshold: f64,
    default_limit: i64,
    max_limit: i64,
}

impl SearchService {
    pub fn new(
        config: &SearchConfig,
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            embedder,
            similarity_threshold: config.similarity_threshold,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn default_limit(&self) -> i64 {
        self.default_limit
    }

    /// Reject blank queries and out-of-range limits before any I/O.
    pub fn validate(&self, query: &str, limit: i64) -> Result<(), SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query must not be empty".to_string()));
        }
        if !(1..=self.max_limit).contains(&limit) {
            return Err(SearchError::InvalidQuery(format!(
                "limit must be between 1 and {}",
                self.max_limit
            )));
        }
        Ok(())
    }

    pub async fn search(
        &self,
        mode: SearchMode,
        query: &str,
        limit: i64,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.validate(query, limit)?;
        let query = query.trim();

        let chunks = match mode {
            SearchMode::Semantic => self.semantic(query, limit).await?,
            SearchMode::Fulltext => self.store.fulltext_search(query, limit).await?,
            SearchMode::Hybrid => self.hybrid(query, limit).await?,
        };
        debug!(%mode, query, results = chunks.len(), "search complete");

        Ok(chunks.into_iter().map(SearchHit::from).collect())
    }

    async fn semantic(&self, query: &str, limit: i64) -> Result<Vec<ScoredChunk>, SearchError> {
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        Ok(self
            .store
            .semantic_search(&query_vec, Some(self.similarity_threshold), limit)
            .await?)
    }

    async fn hybrid(&self, query: &str, limit: i64) -> Result<Vec<ScoredChunk>, SearchError> {
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let (semantic, fulltext) = tokio::try_join!(
            self.store.semantic_search(&query_vec, None, limit),
            self.store.fulltext_search(query, limit),
        )?;
        Ok(merge_hybrid(semantic, fulltext, limit.max(0) as usize))
    }
}

/// Outer-join semantic and full-text candidates on chunk id and score each
/// as `0.7 × semantic + 0.3 × fulltext`, a missing side contributing `0`.
/// Sorted by combined score descending, ties by chunk id.
pub fn merge_hybrid(
    semantic: Vec<ScoredChunk>,
    fulltext: Vec<ScoredChunk>,
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut merged: HashMap<i64, (ScoredChunk, f64, f64)> = HashMap::new();

    for c in semantic {
        let s = c.score;
        merged.insert(c.chunk_id, (c, s, 0.0));
    }
    for c in fulltext {
        let f = c.score;
        merged
            .entry(c.chunk_id)
            .and_modify(|entry| entry.2 = f)
            .or_insert((c, 0.0, f));
    }

    let mut results: Vec<ScoredChunk> = merged
        .into_values()
        .map(|(mut c, s, f)| {
            c.score = SEMANTIC_WEIGHT * s + FULLTEXT_WEIGHT * f;
            c
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(limit);
    results
}
