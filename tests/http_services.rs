//! HTTP surfaces served on ephemeral ports: the embedding service, the
//! search API and the embedding client's retry behaviour.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memory_store::config::{EmbeddingConfig, SearchConfig};
use memory_store::embed_server::{self, Embedder, HashingEmbedder};
use memory_store::embedding::{
    EmbeddingError, EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HttpEmbeddingClient,
};
use memory_store::models::{Chunk, ChunkMetadata, DocumentMetadata, NewDocument};
use memory_store::search::SearchService;
use memory_store::server::{self, SERVICE_NAME};
use memory_store::store::memory::InMemoryStore;
use memory_store::store::Store;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn hashing(dims: usize) -> Option<Arc<dyn Embedder>> {
    Some(Arc::new(HashingEmbedder::new(dims)))
}

// ============ Embedding service ============

#[tokio::test]
async fn embeds_one_vector_per_text() {
    let base = serve(embed_server::router(hashing(384), 100)).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/embeddings", base))
        .json(&json!({"texts": ["hello world", "second text"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: EmbeddingResponse = resp.json().await.unwrap();
    assert_eq!(body.embeddings.len(), 2);
    assert_eq!(body.dimensions, 384);
    assert!(body.embeddings.iter().all(|v| v.len() == 384));
    assert_eq!(body.model_name, "feature-hashing");
    assert!(body.processing_time >= 0.0);
}

#[tokio::test]
async fn rejects_empty_and_oversized_batches() {
    let base = serve(embed_server::router(hashing(16), 2)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/embeddings", base))
        .json(&json!({"texts": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "No texts provided");

    let resp = client
        .post(format!("{}/embeddings", base))
        .json(&json!({"texts": ["a", "b", "c"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Too many texts (max 2)");
}

#[tokio::test]
async fn unloaded_model_answers_503() {
    let base = serve(embed_server::router(None, 100)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/embeddings", base))
        .json(&json!({"texts": ["hello"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "Model not loaded");

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 503);
    let health: Value = resp.json().await.unwrap();
    assert_eq!(health["model_loaded"], false);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn health_and_models_describe_loaded_embedder() {
    let base = serve(embed_server::router(hashing(32), 100)).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let health: Value = resp.json().await.unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["model_loaded"], true);
    assert_eq!(health["dimensions"], 32);

    let models: Value = client
        .get(format!("{}/models", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!models["available_models"].as_array().unwrap().is_empty());
    assert_eq!(models["current_model"], "feature-hashing");
}

#[tokio::test]
async fn http_client_talks_to_embedding_service() {
    let base = serve(embed_server::router(hashing(64), 100)).await;
    let client = HttpEmbeddingClient::new(&EmbeddingConfig {
        url: base,
        ..Default::default()
    })
    .unwrap();

    let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    let vectors = client.embed(&texts).await.unwrap();
    assert_eq!(vectors.len(), 3);
    assert!(vectors.iter().all(|v| v.len() == 64));
}

// ============ Embedding client retries ============

async fn flaky_embeddings(
    State((calls, fail_with)): State<(Arc<AtomicUsize>, StatusCode)>,
    Json(req): Json<EmbeddingRequest>,
) -> axum::response::Response {
    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
        return (fail_with, "not yet").into_response();
    }
    Json(EmbeddingResponse {
        embeddings: req.texts.iter().map(|_| vec![0.5; 4]).collect(),
        model_name: req.model_name,
        dimensions: 4,
        processing_time: 0.0,
    })
    .into_response()
}

async fn flaky_client(fail_with: StatusCode) -> (HttpEmbeddingClient, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/embeddings", post(flaky_embeddings))
        .with_state((calls.clone(), fail_with));
    let base = serve(app).await;

    let client = HttpEmbeddingClient::new(&EmbeddingConfig {
        url: base,
        max_retries: 3,
        backoff_ms: 5,
        ..Default::default()
    })
    .unwrap();
    (client, calls)
}

#[tokio::test]
async fn server_errors_are_retried() {
    let (client, calls) = flaky_client(StatusCode::INTERNAL_SERVER_ERROR).await;

    let vectors = client.embed(&["hello".to_string()]).await.unwrap();
    assert_eq!(vectors, vec![vec![0.5; 4]]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_fail_immediately() {
    let (client, calls) = flaky_client(StatusCode::BAD_REQUEST).await;

    let err = client.embed(&["hello".to_string()]).await.unwrap_err();
    assert!(matches!(err, EmbeddingError::Status { status: 400, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============ Search API ============

/// Every query embeds to the x axis.
struct AxisEmbedder;

#[async_trait]
impl EmbeddingProvider for AxisEmbedder {
    fn model_name(&self) -> &str {
        "axis"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

async fn add_doc(store: &InMemoryStore, path: &str, title: &str, body: &str, vector: &[f32]) {
    let id = store
        .upsert_document(&NewDocument {
            file_path: path.to_string(),
            title: title.to_string(),
            content: body.to_string(),
            metadata: DocumentMetadata::default(),
        })
        .await
        .unwrap();
    let chunk = Chunk {
        chunk_index: 0,
        content: body.to_string(),
        metadata: ChunkMetadata {
            header: title.to_string(),
            header_level: 1,
            size: body.len(),
            total_chunks: 1,
            ..Default::default()
        },
    };
    store.insert_chunk(id, &chunk, vector).await.unwrap();
}

async fn search_api() -> String {
    let store = Arc::new(InMemoryStore::new());
    add_doc(
        &store,
        "docs/rust.md",
        "Rust",
        "Ownership and borrowing keep rust memory safe.",
        &[1.0, 0.0, 0.0],
    )
    .await;
    add_doc(
        &store,
        "docs/python.md",
        "Python",
        "Python generators are lazy iterators.",
        &[0.0, 1.0, 0.0],
    )
    .await;

    let service = SearchService::new(&SearchConfig::default(), store, Arc::new(AxisEmbedder));
    serve(server::router(Arc::new(service))).await
}

async fn get_json(url: String) -> (reqwest::StatusCode, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn semantic_search_applies_similarity_floor() {
    let base = search_api().await;
    let (status, body) = get_json(format!("{}/search/semantic?query=anything", base)).await;

    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);
    assert_eq!(body["query"], "anything");
    assert_eq!(body["results"][0]["file_path"], "docs/rust.md");
    assert_eq!(body["results"][0]["metadata"]["chunk_type"], "complete_section");
}

#[tokio::test]
async fn fulltext_and_hybrid_search() {
    let base = search_api().await;

    let (status, body) = get_json(format!("{}/search/fulltext?query=generators", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["title"], "Python");

    // Hybrid has no similarity floor: both chunks come back, the semantic
    // match first.
    let (status, body) = get_json(format!("{}/search/hybrid?query=generators&limit=5", base)).await;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 2);
    assert_eq!(body["results"][0]["file_path"], "docs/rust.md");
    assert_eq!(body["results"][1]["file_path"], "docs/python.md");
}

#[tokio::test]
async fn invalid_requests_get_json_errors() {
    let base = search_api().await;

    let (status, body) = get_json(format!("{}/search/hybrid?query=rust&limit=abc", base)).await;
    assert_eq!(status, 400);
    assert!(body["detail"].as_str().unwrap().contains("limit"));

    let (status, _) = get_json(format!("{}/search/hybrid?query=rust&limit=0", base)).await;
    assert_eq!(status, 400);

    let (status, _) = get_json(format!("{}/search/hybrid?query=rust&limit=51", base)).await;
    assert_eq!(status, 400);

    let (status, body) = get_json(format!("{}/search/hybrid?query=%20%20", base)).await;
    assert_eq!(status, 400);
    assert!(body["detail"].is_string());

    let (status, body) = get_json(format!("{}/search/fuzzy?query=rust", base)).await;
    assert_eq!(status, 404);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn stats_and_health() {
    let base = search_api().await;

    let (status, stats) = get_json(format!("{}/stats", base)).await;
    assert_eq!(status, 200);
    assert_eq!(stats["documents"], 2);
    assert_eq!(stats["chunks"], 2);
    assert!(stats["last_update"].is_string());

    let (status, health) = get_json(format!("{}/health", base)).await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], SERVICE_NAME);
}
