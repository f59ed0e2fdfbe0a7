//! Processor health checks and the health HTTP server.
//!
//! [`HealthChecker::check`] probes three things:
//!
//! | Check | Healthy when |
//! |-------|--------------|
//! | `database` | the store answers and returns counts |
//! | `embedding_api` | a one-text embedding call succeeds |
//! | `environment` | the docs root exists and can be scanned |
//!
//! The overall status is `healthy` only if all three are. Store metrics are
//! attached when the store can report them.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Full report; 200 when healthy, 503 otherwise |
//! | `GET`  | `/metrics` | Store counts |
//! | `GET`  | `/` | Service info |

use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{internal, ApiError};
use crate::scan::Scanner;
use crate::store::Store;
use crate::task::{wait_for_shutdown, TaskHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Unhealthy,
}

impl Status {
    fn from_ok(ok: bool) -> Self {
        if ok {
            Status::Healthy
        } else {
            Status::Unhealthy
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseCheck {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingCheck {
    pub status: Status,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentCheck {
    pub status: Status,
    pub docs_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub database: DatabaseCheck,
    pub embedding_api: EmbeddingCheck,
    pub environment: EnvironmentCheck,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub checks: HealthChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == Status::Healthy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub timestamp: DateTime<Utc>,
    pub documents: i64,
    pub chunks: i64,
    pub last_update: Option<DateTime<Utc>>,
    pub avg_chunk_words: Option<f64>,
}

pub struct HealthChecker {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    scanner: Scanner,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingProvider>, scanner: Scanner) -> Self {
        Self {
            store,
            embedder,
            scanner,
        }
    }

    pub async fn check(&self) -> HealthReport {
        let (database, embedding_api, environment, metrics) = tokio::join!(
            self.check_database(),
            self.check_embedding(),
            self.check_environment(),
            self.metrics()
        );

        let healthy = database.status == Status::Healthy
            && embedding_api.status == Status::Healthy
            && environment.status == Status::Healthy;

        HealthReport {
            status: Status::from_ok(healthy),
            timestamp: Utc::now(),
            checks: HealthChecks {
                database,
                embedding_api,
                environment,
            },
            metrics: metrics.ok(),
        }
    }

    async fn check_database(&self) -> DatabaseCheck {
        let result = async {
            self.store.ping().await?;
            self.store.stats().await
        }
        .await;

        match result {
            Ok(stats) => DatabaseCheck {
                status: Status::Healthy,
                document_count: Some(stats.documents),
                chunk_count: Some(stats.chunks),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "database health check failed");
                DatabaseCheck {
                    status: Status::Unhealthy,
                    document_count: None,
                    chunk_count: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn check_embedding(&self) -> EmbeddingCheck {
        let model = self.embedder.model_name().to_string();
        match embed_query(self.embedder.as_ref(), "health check").await {
            Ok(v) => EmbeddingCheck {
                status: Status::Healthy,
                model,
                dimensions: Some(v.len()),
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "embedding health check failed");
                EmbeddingCheck {
                    status: Status::Unhealthy,
                    model,
                    dimensions: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn check_environment(&self) -> EnvironmentCheck {
        let docs_path = self.scanner.root().display().to_string();
        let scanner = self.scanner.clone();
        let scanned = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

        match scanned {
            Ok(files) => EnvironmentCheck {
                status: Status::Healthy,
                docs_path,
                markdown_files: Some(files.len()),
                error: None,
            },
            Err(e) => EnvironmentCheck {
                status: Status::Unhealthy,
                docs_path,
                markdown_files: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn metrics(&self) -> Result<Metrics> {
        let stats = self.store.stats().await?;
        Ok(Metrics {
            timestamp: Utc::now(),
            documents: stats.documents,
            chunks: stats.chunks,
            last_update: stats.last_update,
            avg_chunk_words: stats.avg_chunk_words,
        })
    }
}

pub fn router(checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/", get(handle_root))
        .layer(TraceLayer::new_for_http())
        .with_state(checker)
}

/// Bind `bind` and serve the health endpoints on a supervised task.
/// Returns the handle and the bound address.
pub async fn spawn_health_server(
    bind: &str,
    checker: Arc<HealthChecker>,
) -> Result<(TaskHandle, SocketAddr)> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "health server listening");

    let app = router(checker);
    let handle = TaskHandle::spawn("health-server", move |mut rx| async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { wait_for_shutdown(&mut rx).await })
            .await;
        if let Err(e) = served {
            warn!(error = %e, "health server exited with error");
        }
    });
    Ok((handle, addr))
}

async fn handle_health(
    State(checker): State<Arc<HealthChecker>>,
) -> (StatusCode, Json<HealthReport>) {
    let report = checker.check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn handle_metrics(
    State(checker): State<Arc<HealthChecker>>,
) -> Result<Json<Metrics>, ApiError> {
    checker.metrics().await.map(Json).map_err(|e| {
        warn!(error = %e, "metrics query failed");
        internal(format!("Failed to get metrics: {}", e))
    })
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    endpoints: [&'static str; 3],
}

async fn handle_root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "memory-store-processor",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: ["/health", "/metrics", "/"],
    })
}
