//! HTTP error types and response formatting.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::store::StoreError;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Event storage failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Blocking task panicked or was cancelled.
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (error, message) = match &self {
            Self::Store(err) => {
                tracing::error!(error = %err, "storage error");
                ("storage_error", "Event storage is unavailable")
            }
            Self::Join(err) => {
                tracing::error!(error = %err, "blocking task failed");
                ("internal_error", "An internal error occurred")
            }
        };

        let body = ErrorResponse { error, message };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_503() {
        let err = ApiError::from(StoreError::Database(rusqlite::Error::InvalidQuery));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
