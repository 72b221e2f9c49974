use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::followups::orchestrator::RefreshError;
use crate::storage::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Follow-up refresh is disabled")]
    RefreshDisabled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Refresh error: {0}")]
    Refresh(#[from] RefreshError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "A user identity is required".to_string(),
            ),
            AppError::RefreshDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "REFRESH_DISABLED",
                "No language-model credential is configured".to_string(),
            ),
            AppError::Store(StoreError::Remote(e)) => {
                tracing::warn!("Remote conversation store unavailable: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "Conversation history is temporarily unavailable, try again shortly"
                        .to_string(),
                )
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Refresh(e) => {
                tracing::error!("Refresh error: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "REFRESH_FAILED",
                    "Recommendations could not be refreshed".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
