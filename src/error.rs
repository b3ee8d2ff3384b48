use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::types::ItemStatus;

/// A single offending input field, reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// The primary error type for the application.
///
/// Every layer below the HTTP handlers returns this type so that the gateway
/// can map it to a status code without inspecting storage details.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Input failed validation. The client must fix and resubmit.
    #[error("Validation failed: {}", summarize(.fields))]
    Validation { fields: Vec<FieldError> },
    #[error("Not found: {0}")]
    NotFound(String),
    /// A status change that the lifecycle does not permit.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: ItemStatus, to: ItemStatus },
    /// A concurrent write won the race. Safe to retry.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Transient infrastructure failure, surfaced after retries are exhausted.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Rate limited. Retry after {retry_after_seconds} seconds")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn summarize(fields: &[FieldError]) -> String {
    fields.iter().map(|f| format!("{}: {}", f.field, f.message)).collect::<Vec<_>>().join("; ")
}

impl AppError {
    /// Shorthand for a validation error on a single field.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation { fields: vec![FieldError::new(field, message)] }
    }

    /// Whether a caller may retry the failed operation unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::Validation { fields } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Request validation failed".to_string(),
                Some(json!({ "fields": fields })),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::InvalidTransition { from, to } => (
                StatusCode::CONFLICT,
                "INVALID_TRANSITION",
                format!("Cannot change status from {} to {}", from, to),
                Some(json!({ "from": from, "to": to })),
            ),
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, "CONFLICT", msg, Some(json!({ "retryable": true })))
            }
            AppError::StorageUnavailable(msg) => {
                tracing::warn!("Storage unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORAGE_UNAVAILABLE",
                    "Storage is temporarily unavailable, please retry later".to_string(),
                    Some(json!({ "retryable": true })),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AppError::StorageUnavailable("database connection pool unavailable".to_string())
            }
            sqlx::Error::Io(e) => AppError::StorageUnavailable(format!("database I/O: {}", e)),
            sqlx::Error::Database(db_err) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6) clear up on their own
                let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                let msg = db_err.message().to_lowercase();
                if code == "5" || code == "6" || msg.contains("database is locked") || msg.contains("busy") {
                    AppError::StorageUnavailable(format!("database busy: {}", db_err.message()))
                } else {
                    AppError::Internal(anyhow::anyhow!("database error: {}", db_err.message()))
                }
            }
            other => AppError::Internal(anyhow::anyhow!("database error: {}", other)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StorageUnavailable(format!("{}: {}", err.kind(), err))
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// Converts an `Option` into a `NotFound` error.
pub trait OptionExt<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}

/// Collects field errors so a request can report every problem at once.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `Ok(())` when nothing was collected, otherwise a `Validation` error.
    pub fn into_result(self) -> AppResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation { fields: self.0 })
        }
    }
}
