/// Error types for the coupon service
///
/// Errors are converted to the HTTP responses the issuance contract
/// promises: validation failures are 400, store/publish unavailability is
/// 503 (the client may retry), everything else is a plain 5xx. Business
/// rejections (duplicate user, sold out) are not errors at all; they are
/// 200 responses with `success: false`.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use thiserror::Error;

use crate::store::StoreError;

/// Result type for coupon-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Request failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// The event's stock key was never seeded; initialization is an
    /// explicit admin action, never implicit
    #[error("stock not initialized for event: {0}")]
    StockNotInitialized(String),

    /// The in-memory store could not be reached before the decision
    #[error("coupon store unavailable: {0}")]
    StoreUnavailable(String),

    /// The issuance event could not be made durable; the decision was
    /// compensated and the client may retry
    #[error("issuance publish failed: {0}")]
    PublishFailed(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflict with existing state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::Script(msg) => AppError::Internal(msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::StockNotInitialized(_)
            | AppError::StoreUnavailable(_)
            | AppError::PublishFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        HttpResponse::build(status).json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_disposition_table() {
        assert_eq!(
            AppError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::StockNotInitialized("e1".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::StoreUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::PublishFailed("timeout".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::NotFound("e1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Conflict("used".into()).status_code(),
            StatusCode::CONFLICT
        );
    }
}
