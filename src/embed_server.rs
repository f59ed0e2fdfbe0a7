//! Embedding service: turns batches of text into L2-normalized vectors.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/embeddings` | `{texts, model_name?}` → `{embeddings, model_name, dimensions, processing_time}` |
//! | `GET`  | `/health` | Model status |
//! | `GET`  | `/models` | Supported models and the one loaded |
//!
//! # Backends
//!
//! | `embedding_service.backend` | Embedder |
//! |-----------------------------|----------|
//! | `"local"` | `FastEmbedder`: ONNX sentence-transformer via fastembed (feature `local-embeddings-fastembed`) |
//! | `"hashing"` | [`HashingEmbedder`]: signed feature hashing of word tokens, no model download |
//!
//! The service starts even when the model fails to load; `/embeddings`
//! then answers 503 and `/health` reports `model_loaded: false`.

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::EmbeddingServiceConfig;
use crate::embedding::{l2_normalize, EmbeddingRequest, EmbeddingResponse};
use crate::error::{bad_request, internal, unavailable, ApiError};

/// A synchronous text embedder. Calls run on the blocking thread pool.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn device(&self) -> &str {
        "cpu"
    }
    /// One unit-length vector per input, in input order.
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Catalogue entry for `GET /models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: &'static str,
    pub dimensions: usize,
    pub description: &'static str,
}

pub const AVAILABLE_MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "all-minilm-l6-v2",
        dimensions: 384,
        description: "Fast and efficient, good for general purpose",
    },
    ModelInfo {
        name: "bge-small-en-v1.5",
        dimensions: 384,
        description: "Small English model with strong retrieval quality",
    },
    ModelInfo {
        name: "bge-base-en-v1.5",
        dimensions: 768,
        description: "Larger English model, higher quality, slower",
    },
    ModelInfo {
        name: "multilingual-e5-small",
        dimensions: 384,
        description: "Multilingual support",
    },
];

// ============ Hashing embedder ============

/// Deterministic bag-of-words embedder: each lowercase alphanumeric token is
/// hashed into one of `dims` buckets with a sign taken from the hash.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[index] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "feature-hashing"
    }
    fn dimensions(&self) -> usize {
        self.dims
    }
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ fastembed ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::FastEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use anyhow::{anyhow, bail, Result};
    use std::sync::Mutex;

    use super::{Embedder, AVAILABLE_MODELS};
    use crate::embedding::l2_normalize;

    /// Local ONNX model. Downloaded from Hugging Face on first use and
    /// cached; no network calls afterwards.
    pub struct FastEmbedder {
        name: String,
        dims: usize,
        model: Mutex<fastembed::TextEmbedding>,
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
                other
            ),
        }
    }

    impl FastEmbedder {
        /// Load `name`, downloading it if needed. Blocking.
        pub fn load(name: &str) -> Result<Self> {
            let normalized = name.to_lowercase();
            let model_id = to_fastembed_model(&normalized)?;
            let dims = AVAILABLE_MODELS
                .iter()
                .find(|m| m.name == normalized)
                .map(|m| m.dimensions)
                .unwrap_or(384);

            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model_id).with_show_download_progress(true),
            )
            .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;

            Ok(Self {
                name: normalized,
                dims,
                model: Mutex::new(model),
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn model_name(&self) -> &str {
            &self.name
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| anyhow!("embedding model lock poisoned"))?;
            let mut vectors = model
                .embed(texts, None)
                .map_err(|e| anyhow!("Local embedding failed: {}", e))?;
            for v in vectors.iter_mut() {
                l2_normalize(v);
            }
            Ok(vectors)
        }
    }
}

/// Build the embedder named by `embedding_service.backend`. Loading a
/// local model blocks while it downloads.
pub async fn load_embedder(config: &EmbeddingServiceConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.hashing_dims))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => {
            let name = config.model.clone();
            let embedder = tokio::task::spawn_blocking(move || FastEmbedder::load(&name)).await??;
            Ok(Arc::new(embedder))
        }
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => anyhow::bail!(
            "Local embedding backend requires --features local-embeddings-fastembed"
        ),
        other => anyhow::bail!("Unknown embedding backend: {}", other),
    }
}

#[derive(Clone)]
struct ServiceState {
    embedder: Option<Arc<dyn Embedder>>,
    max_texts: usize,
}

/// Build the router. `embedder` is `None` when the model failed to load.
pub fn router(embedder: Option<Arc<dyn Embedder>>, max_texts: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/embeddings", post(handle_embeddings))
        .route("/health", get(handle_health))
        .route("/models", get(handle_models))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ServiceState {
            embedder,
            max_texts,
        })
}

pub async fn run_embedding_server(
    config: &EmbeddingServiceConfig,
    embedder: Option<Arc<dyn Embedder>>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        model = embedder.as_ref().map(|e| e.model_name()).unwrap_or("none"),
        "embedding service listening"
    );
    axum::serve(listener, router(embedder, config.max_texts))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ POST /embeddings ============

async fn handle_embeddings(
    State(state): State<ServiceState>,
    body: Result<Json<EmbeddingRequest>, JsonRejection>,
) -> Result<Json<EmbeddingResponse>, ApiError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;

    if request.texts.is_empty() {
        return Err(bad_request("No texts provided"));
    }
    if request.texts.len() > state.max_texts {
        return Err(bad_request(format!(
            "Too many texts (max {})",
            state.max_texts
        )));
    }

    let embedder = state
        .embedder
        .clone()
        .ok_or_else(|| unavailable("Model not loaded"))?;

    if !request.model_name.eq_ignore_ascii_case(embedder.model_name()) {
        debug!(
            requested = %request.model_name,
            loaded = embedder.model_name(),
            "serving loaded model instead of requested one"
        );
    }

    let started = Instant::now();
    let count = request.texts.len();
    let worker = embedder.clone();
    let embeddings = tokio::task::spawn_blocking(move || worker.embed(request.texts))
        .await
        .map_err(|e| internal(format!("Embedding generation failed: {}", e)))?
        .map_err(|e| internal(format!("Embedding generation failed: {}", e)))?;

    let dimensions = embeddings
        .first()
        .map(|v| v.len())
        .unwrap_or_else(|| embedder.dimensions());
    let processing_time = started.elapsed().as_secs_f64();
    debug!(texts = count, dimensions, processing_time, "embedded batch");

    Ok(Json(EmbeddingResponse {
        embeddings,
        model_name: embedder.model_name().to_string(),
        dimensions,
        processing_time,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    model_name: Option<String>,
    device: String,
    dimensions: Option<usize>,
}

/// Answers 503 while no model is loaded.
async fn handle_health(State(state): State<ServiceState>) -> (StatusCode, Json<HealthResponse>) {
    let embedder = state.embedder.as_ref();
    let code = if embedder.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = Json(HealthResponse {
        status: if embedder.is_some() {
            "healthy"
        } else {
            "unhealthy"
        },
        model_loaded: embedder.is_some(),
        model_name: embedder.map(|e| e.model_name().to_string()),
        device: embedder.map(|e| e.device()).unwrap_or("cpu").to_string(),
        dimensions: embedder.map(|e| e.dimensions()),
    });
    (code, body)
}

// ============ GET /models ============

#[derive(Serialize)]
struct ModelsResponse {
    available_models: &'static [ModelInfo],
    current_model: Option<String>,
}

async fn handle_models(State(state): State<ServiceState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        available_models: AVAILABLE_MODELS,
        current_model: state.embedder.map(|e| e.model_name().to_string()),
    })
}
