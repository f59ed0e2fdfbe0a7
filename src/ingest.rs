//! Ingestion pipeline: file → hash check → chunk → embed → store.
//!
//! Each file is handled by [`Ingestor::process_file`]:
//!
//! 1. Hash the raw bytes (SHA-256). If the store already holds this path
//!    with the same hash, the file is skipped without any writes.
//! 2. Chunk the text. A document with no chunks is a failure and nothing is
//!    written.
//! 3. Upsert the document row, then delete every chunk it had.
//! 4. Embed the chunks in batches of `embedding.batch_size`, pausing
//!    `embedding.request_delay_ms` between calls, and insert one row per
//!    chunk.
//!
//! If step 3 or 4 fails the stored hash is cleared, so the next pass
//! retries the file instead of treating it as unchanged.
//!
//! [`Ingestor::process_all`] runs that over every matching file in path
//! order; one file failing never stops the rest.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::chunk::{chunk_markdown, extract_title};
use crate::config::Config;
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::models::{Chunk, DocumentMetadata, NewDocument};
use crate::scan::Scanner;
use crate::store::Store;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8")]
    NotUtf8(PathBuf),
    #[error("{0} has no content to chunk")]
    EmptyDocument(PathBuf),
    #[error("embedding chunk batch starting at {chunk_index} failed: {source}")]
    Embedding {
        chunk_index: i64,
        #[source]
        source: EmbeddingError,
    },
    #[error("embedding service returned {got} vectors for {expected} chunks")]
    VectorCount { expected: usize, got: usize },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Processed { chunks: usize },
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

impl IngestReport {
    pub fn record(&mut self, outcome: &Result<FileOutcome, IngestError>) {
        match outcome {
            Ok(FileOutcome::Processed { chunks }) => {
                self.processed += 1;
                self.chunks_written += chunks;
            }
            Ok(FileOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Ingestor {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    scanner: Scanner,
    max_chars: usize,
    overlap_lines: usize,
    batch_size: usize,
    request_delay: Duration,
}

impl Ingestor {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            scanner: Scanner::new(&config.docs)?,
            max_chars: config.chunking.max_chars,
            overlap_lines: config.chunking.overlap_lines,
            batch_size: config.embedding.batch_size.max(1),
            request_delay: Duration::from_millis(config.embedding.request_delay_ms),
        })
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Process every matching file under the docs root, sequentially.
    pub async fn process_all(&self) -> Result<IngestReport> {
        let files = self.scanner.scan()?;
        info!(
            root = %self.scanner.root().display(),
            files = files.len(),
            "starting document processing"
        );

        let mut report = IngestReport::default();
        for path in &files {
            let outcome = self.process_file(path).await;
            if let Err(e) = &outcome {
                error!(path = %path.display(), error = %e, "failed to process file");
            }
            report.record(&outcome);
        }

        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            chunks = report.chunks_written,
            "processing complete"
        );
        Ok(report)
    }

    pub async fn process_file(&self, path: &Path) -> Result<FileOutcome, IngestError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file_hash = sha256_hex(&bytes);
        let file_path = path.display().to_string();

        if self.store.document_hash(&file_path).await?.as_deref() == Some(file_hash.as_str()) {
            debug!(path = %file_path, "unchanged, skipping");
            return Ok(FileOutcome::Skipped);
        }

        let content =
            String::from_utf8(bytes).map_err(|_| IngestError::NotUtf8(path.to_path_buf()))?;
        let chunks = chunk_markdown(&content, self.max_chars, self.overlap_lines);
        if chunks.is_empty() {
            return Err(IngestError::EmptyDocument(path.to_path_buf()));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let doc = NewDocument {
            file_path: file_path.clone(),
            title: extract_title(&content, &stem),
            metadata: DocumentMetadata {
                file_hash: Some(file_hash),
                file_size: content.len() as u64,
                last_modified: modified_secs(path).await,
                processed_at: system_secs(SystemTime::now()),
            },
            content,
        };

        let document_id = self.store.upsert_document(&doc).await?;
        match self.write_chunks(document_id, &chunks).await {
            Ok(()) => {
                info!(path = %file_path, chunks = chunks.len(), "processed document");
                Ok(FileOutcome::Processed {
                    chunks: chunks.len(),
                })
            }
            Err(e) => {
                if let Err(clear_err) = self.store.clear_document_hash(document_id).await {
                    warn!(path = %file_path, error = %clear_err, "could not clear document hash");
                }
                Err(e)
            }
        }
    }

    async fn write_chunks(&self, document_id: i64, chunks: &[Chunk]) -> Result<(), IngestError> {
        let removed = self.store.delete_chunks(document_id).await?;
        if removed > 0 {
            debug!(document_id, removed, "deleted previous chunks");
        }

        for (i, batch) in chunks.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors =
                self.embedder
                    .embed(&texts)
                    .await
                    .map_err(|source| IngestError::Embedding {
                        chunk_index: batch[0].chunk_index,
                        source,
                    })?;
            if vectors.len() != batch.len() {
                return Err(IngestError::VectorCount {
                    expected: batch.len(),
                    got: vectors.len(),
                });
            }

            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                self.store.insert_chunk(document_id, chunk, vector).await?;
            }
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn system_secs(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

async fn modified_secs(path: &Path) -> f64 {
    tokio::fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .map(system_secs)
        .unwrap_or_default()
}
