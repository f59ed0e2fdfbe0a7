//! Postgres + pgvector [`Store`].
//!
//! Expects the `vector` extension and two tables owned by the database
//! deployment:
//!
//! ```text
//! documents(id, file_path UNIQUE, title, content, metadata JSONB,
//!           created_at, updated_at)
//! document_chunks(id, document_id → documents.id, chunk_index, content,
//!                 embedding vector(N), metadata JSONB,
//!                 content_tsvector tsvector GENERATED, created_at)
//! ```
//!
//! Vectors travel as pgvector text literals (`[0.1,0.2,...]`) cast with
//! `::vector`, so no extra driver support is needed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{info, warn};

use super::Store;
use crate::config::DbConfig;
use crate::models::{Chunk, ChunkMetadata, NewDocument, ScoredChunk, StoreStats};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check that pgvector and both tables exist. A missing extension is
    /// only logged because a managed database may expose it differently;
    /// missing tables are fatal.
    pub async fn verify_schema(&self) -> Result<()> {
        let has_vector: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_extension WHERE extname = 'vector')")
                .fetch_one(&self.pool)
                .await?;
        if !has_vector {
            warn!("pgvector extension not found");
        }

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_name IN ('documents', 'document_chunks')",
        )
        .fetch_all(&self.pool)
        .await?;

        for required in ["documents", "document_chunks"] {
            if !tables.iter().any(|t| t == required) {
                bail!("required table '{}' does not exist", required);
            }
        }

        info!("database schema verified");
        Ok(())
    }
}

/// Open a pool, polling at a fixed interval until the database answers or
/// `connect_retries` attempts have failed.
pub async fn connect(config: &DbConfig) -> Result<PgStore> {
    let url = config.require_url()?;
    let interval = Duration::from_secs(config.connect_retry_interval_secs);
    let attempts = config.connect_retries.max(1);

    let mut last_err = None;
    for attempt in 1..=attempts {
        match try_connect(config, url).await {
            Ok(pool) => {
                info!(attempt, "connected to database");
                return Ok(PgStore::new(pool));
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "database not ready");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| anyhow::anyhow!("no connection attempt made"))
        .context(format!("database unavailable after {} attempts", attempts)))
}

async fn try_connect(config: &DbConfig, url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    Ok(pool)
}

/// Render a vector as a pgvector text literal.
pub fn to_vector_literal(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn now_secs() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn row_to_scored(row: &PgRow) -> ScoredChunk {
    let chunk_id: i64 = row.get("chunk_id");
    let raw: Option<serde_json::Value> = row.get("metadata");
    let metadata = decode_metadata(chunk_id, raw);

    ScoredChunk {
        chunk_id,
        document_id: row.get("document_id"),
        file_path: row.get("file_path"),
        title: row.get::<Option<String>, _>("title").unwrap_or_default(),
        content: row.get("content"),
        metadata,
        score: row.get("score"),
    }
}

/// Null, empty or malformed metadata decodes to defaults rather than
/// failing the query.
fn decode_metadata(chunk_id: i64, raw: Option<serde_json::Value>) -> ChunkMetadata {
    match raw {
        None | Some(serde_json::Value::Null) => ChunkMetadata::default(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => ChunkMetadata::default(),
        Some(serde_json::Value::String(s)) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(chunk_id, error = %e, "unparseable chunk metadata");
            ChunkMetadata::default()
        }),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(chunk_id, error = %e, "unparseable chunk metadata");
            ChunkMetadata::default()
        }),
    }
}

const CHUNK_COLUMNS: &str = "dc.id::bigint AS chunk_id, d.id::bigint AS document_id, \
     d.file_path, d.title, dc.content, dc.metadata";

#[async_trait]
impl Store for PgStore {
    async fn document_hash(&self, file_path: &str) -> Result<Option<String>> {
        let hash: Option<Option<String>> =
            sqlx::query_scalar("SELECT metadata->>'file_hash' FROM documents WHERE file_path = $1")
                .bind(file_path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(hash.flatten())
    }

    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        let mut metadata = doc.metadata.clone();
        if metadata.processed_at == 0.0 {
            metadata.processed_at = now_secs();
        }

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO documents (file_path, title, content, metadata, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (file_path) DO UPDATE SET
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
             RETURNING id::bigint",
        )
        .bind(&doc.file_path)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(Json(&metadata))
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert document {}", doc.file_path))?;

        Ok(id)
    }

    async fn clear_document_hash(&self, document_id: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET metadata = metadata - 'file_hash' WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_chunks(&self, document_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_chunk(&self, document_id: i64, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        sqlx::query(
            "INSERT INTO document_chunks (document_id, chunk_index, content, embedding, metadata)
             VALUES ($1, $2, $3, $4::vector, $5)",
        )
        .bind(document_id)
        .bind(chunk.chunk_index as i32)
        .bind(&chunk.content)
        .bind(to_vector_literal(embedding))
        .bind(Json(&chunk.metadata))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert chunk {}", chunk.chunk_index))?;
        Ok(())
    }

    async fn semantic_search(
        &self,
        query_vec: &[f32],
        min_similarity: Option<f64>,
        limit: i64,
    ) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}, (1 - (dc.embedding <=> $1::vector))::float8 AS score
             FROM document_chunks dc
             JOIN documents d ON dc.document_id = d.id
             WHERE dc.embedding IS NOT NULL
               AND ($2::float8 IS NULL OR 1 - (dc.embedding <=> $1::vector) >= $2::float8)
             ORDER BY dc.embedding <=> $1::vector, dc.id
             LIMIT $3"
        );

        let rows = sqlx::query(&sql)
            .bind(to_vector_literal(query_vec))
            .bind(min_similarity)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_scored).collect())
    }

    async fn fulltext_search(&self, query: &str, limit: i64) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS},
                    ts_rank(dc.content_tsvector, plainto_tsquery('english', $1))::float8 AS score
             FROM document_chunks dc
             JOIN documents d ON dc.document_id = d.id
             WHERE dc.content_tsvector @@ plainto_tsquery('english', $1)
             ORDER BY score DESC, dc.id
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(row_to_scored).collect())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let last_update: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(updated_at)::timestamptz FROM documents")
                .fetch_one(&self.pool)
                .await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS chunks,
                    AVG(array_length(regexp_split_to_array(content, '\\s+'), 1))::float8 AS avg_words
             FROM document_chunks",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            documents,
            chunks: row.get("chunks"),
            last_update,
            avg_chunk_words: row.get("avg_words"),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
