//! Request-scoped error taxonomy (§7).
//!
//! Composes the lower-level module errors into the handful of outcomes the
//! HTTP boundary needs to distinguish: a 400 before any side effect, a 500
//! for storage/extraction failures, and the SSE-stream error event for
//! failures after headers have already flushed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("malformed request: {0}")]
    Input(String),
    #[error(transparent)]
    Storage(#[from] mnemo_core::StorageError),
    #[error("extractor error: {0}")]
    Extract(#[from] mnemo_core::extract::ExtractError),
    #[error("upstream model error: {0}")]
    UpstreamLlm(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Input(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Storage(_) | EngineError::Extract(_) | EngineError::UpstreamLlm(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody { error: self.to_string() };
        (status, axum::Json(body)).into_response()
    }
}
