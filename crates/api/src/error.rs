use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scripter_core::CoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `scripter_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

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
            AppError::Core(core) => classify_core_error(core),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map a domain error to an HTTP status, error code, and message.
///
/// Script failures and sandbox failures keep their message, since it
/// describes the submitted script; registry and internal failures do not.
fn classify_core_error(err: &CoreError) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Dependency(msg) => (StatusCode::BAD_REQUEST, "DEPENDENCY_ERROR", msg.clone()),
        CoreError::Serialization(msg) => {
            (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR", msg.clone())
        }
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Backend { .. } => {
            tracing::warn!(error = %err, "Script failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SCRIPT_ERROR",
                err.to_string(),
            )
        }
        CoreError::Sandbox(msg) => {
            tracing::warn!(error = %msg, "Sandbox failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "SANDBOX_ERROR", msg.clone())
        }
        CoreError::Registry(_) | CoreError::Internal(_) => {
            tracing::error!(error = %err, "Internal core error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
