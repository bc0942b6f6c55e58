use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use rollcall_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Invalid confirmation code")]
    InvalidCode,

    #[error("Confirmation code has expired")]
    ExpiredCode,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Storage unavailable: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CourseMissing => ServerError::NotFound("Course not found".to_string()),
            StoreError::InvalidCourse(msg) => ServerError::BadRequest(msg),
            StoreError::DuplicateName
            | StoreError::DuplicateStudent
            | StoreError::DuplicateDevice => ServerError::Conflict(e.to_string()),
            StoreError::Unavailable(msg) => ServerError::Storage(msg),
            other => ServerError::Storage(other.to_string()),
        }
    }
}

impl ServerError {
    /// Machine-readable kind for the response body; the student form and the
    /// dashboard branch on this.
    fn kind(&self) -> &'static str {
        match self {
            ServerError::NotFound(_) => "not_found",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::InvalidCode => "invalid_code",
            ServerError::ExpiredCode => "expired_code",
            ServerError::Conflict(_) => "conflict",
            ServerError::Forbidden(_) => "forbidden",
            ServerError::Storage(_) | ServerError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_)
            | ServerError::InvalidCode
            | ServerError::ExpiredCode => StatusCode::BAD_REQUEST,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Storage(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Hide driver-level detail from clients; the log has it.
            ServerError::Storage(detail) => {
                tracing::error!(error = %detail, "storage failure");
                "The service is temporarily unavailable".to_string()
            }
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                "An unexpected error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": self.kind(),
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
