//! JSON error responses shared by every HTTP surface.
//!
//! ```json
//! { "detail": "limit must be between 1 and 50" }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::search::SearchError;

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// An error that renders as `{"detail": ...}` with its status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

pub fn bad_request(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, detail)
}

pub fn not_found(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, detail)
}

pub fn internal(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
}

pub fn unavailable(detail: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::SERVICE_UNAVAILABLE, detail)
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::UnknownMode(_) => not_found(err.to_string()),
            SearchError::InvalidQuery(msg) => bad_request(msg),
            SearchError::Embedding(e) => {
                error!(error = %e, "query embedding failed");
                internal("Failed to generate embedding")
            }
            SearchError::Store(e) => {
                error!(error = %e, "search query failed");
                internal("Search failed")
            }
        }
    }
}
