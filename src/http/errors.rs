use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::errors::{OrchestratorError, StoreError};

/// API-facing error wrapper mapping domain errors to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub(super) enum WebError {
    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("invalid query parameter: {0}")]
    InvalidQuery(String),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            WebError::Orchestrator(err) => {
                let status = match err {
                    OrchestratorError::TaskNotFound { .. }
                    | OrchestratorError::ExecutionNotFound { .. } => StatusCode::NOT_FOUND,
                    OrchestratorError::TaskNotActive { .. }
                    | OrchestratorError::NotRetryable { .. }
                    | OrchestratorError::NotCancellable { .. } => StatusCode::CONFLICT,
                    OrchestratorError::ConfigurationGone { .. } => StatusCode::GONE,
                    OrchestratorError::SubmissionFailed { .. }
                    | OrchestratorError::RepositoryFailed { .. } => {
                        tracing::error!(error = %err, "Request failed internally");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.kind().as_code(), err.to_string())
            }
            WebError::Store(err) => {
                tracing::error!(error = %err, "Execution store access failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    "Internal server error".to_string(),
                )
            }
            WebError::ExecutionNotFound(id) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                format!("Execution not found: {}", id),
            ),
            WebError::InvalidQuery(details) => (
                StatusCode::BAD_REQUEST,
                "ValidationError",
                details.clone(),
            ),
        };

        (
            status,
            Json(json!({
                "error": code,
                "message": message,
            })),
        )
            .into_response()
    }
}
