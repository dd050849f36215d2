use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::StoreError;
use crate::services::{
    email::EmailError, inference::InferenceError, queue::QueueError, storage::StorageError,
};

/// Error type for HTTP handlers.
///
/// Every service error folds into one of these categories; [`IntoResponse`]
/// turns them into a JSON `{"error", "code"}` body.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or malformed input the caller can fix.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The referenced job does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request body or fetched image exceeds the configured size cap.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Record store, object store or queue failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Inference or email API failure.
    #[error("Upstream error: {0}")]
    Upstream(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            _ => AppError::Storage(err.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<EmailError> for AppError {
    fn from(err: EmailError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<garde::Report> for AppError {
    fn from(report: garde::Report) -> Self {
        AppError::Validation(report.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            AppError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "Storage is unavailable".to_string(),
                )
            }
            AppError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Upstream error");
                (StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_ERROR", msg)
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (AppError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::Upstream("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_service_errors_are_classified() {
        assert!(matches!(
            AppError::from(StoreError::Unavailable),
            AppError::Storage(_)
        ));
        assert!(matches!(
            AppError::from(QueueError::Unavailable),
            AppError::Storage(_)
        ));
        assert!(matches!(
            AppError::from(StorageError::TooLarge {
                locator: "https://example.com/big.png".into(),
                limit: 1024,
            }),
            AppError::PayloadTooLarge(_)
        ));
        assert!(matches!(
            AppError::from(EmailError::Disabled),
            AppError::Upstream(_)
        ));
    }
}
