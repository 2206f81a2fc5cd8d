use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quicksync_core::error::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `quicksync_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A request body that failed field validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] validator::ValidationErrors),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::UnsupportedFormat(_) => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED_FORMAT", core.to_string())
                }
                CoreError::MalformedInput(_) => {
                    (StatusCode::BAD_REQUEST, "MALFORMED_INPUT", core.to_string())
                }
                CoreError::Mapping { .. } => {
                    (StatusCode::BAD_REQUEST, "MAPPING_ERROR", core.to_string())
                }
                CoreError::UnresolvedConflict { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "UNRESOLVED_CONFLICT",
                    core.to_string(),
                ),
                CoreError::UnresolvedRestore { .. } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "UNRESOLVED_RESTORE",
                    core.to_string(),
                ),
                CoreError::Execution { external_id, reason } => {
                    tracing::error!(%external_id, %reason, "Migration execution failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "EXECUTION_ERROR",
                        core.to_string(),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::InvalidRequest(errors) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", errors.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
