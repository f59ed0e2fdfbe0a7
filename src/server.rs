//! Search HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/search/{mode}?query=&limit=` | `semantic`, `fulltext` or `hybrid` search |
//! | `GET`  | `/stats` | Document/chunk counts and last update |
//! | `GET`  | `/health` | Liveness check |
//!
//! `limit` defaults to `search.default_limit` and must lie in
//! `1..=search.max_limit`. Errors are `{"detail": ...}`: 400 for bad
//! parameters, 404 for an unknown mode, 500 when embedding or the store
//! fails.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use anyhow::Result;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{bad_request, internal, ApiError};
use crate::models::SearchResponse;
use crate::search::{SearchMode, SearchService};

pub const SERVICE_NAME: &str = "memory-store-search-api";

#[derive(Clone)]
struct AppState {
    search: Arc<SearchService>,
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn router(search: Arc<SearchService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search/{mode}", get(handle_search))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { search })
}

/// Serve the search API on `bind` until `shutdown` resolves.
pub async fn run_server(
    bind: &str,
    search: Arc<SearchService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "search API listening");
    axum::serve(listener, router(search))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed.
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ============ GET /search/{mode} ============

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: Option<String>,
    /// Kept as text so a non-numeric value gets a JSON 400 like every other
    /// validation failure.
    #[serde(default)]
    limit: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    Path(mode): Path<String>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let mode: SearchMode = mode.parse()?;
    let Query(params) = params.map_err(|e| bad_request(e.body_text()))?;

    let query = params.query.unwrap_or_default();
    let limit = match params.limit.as_deref().map(str::trim) {
        None | Some("") => state.search.default_limit(),
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| bad_request(format!("limit must be an integer, got '{}'", raw)))?,
    };

    let results = state.search.search(mode, &query, limit).await?;
    Ok(Json(SearchResponse {
        count: results.len(),
        results,
        query,
    }))
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    documents: i64,
    chunks: i64,
    last_update: Option<DateTime<Utc>>,
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.search.store().stats().await.map_err(|e| {
        tracing::error!(error = %e, "stats query failed");
        internal("Failed to get stats")
    })?;
    Ok(Json(StatsResponse {
        documents: stats.documents,
        chunks: stats.chunks,
        last_update: stats.last_update,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}
