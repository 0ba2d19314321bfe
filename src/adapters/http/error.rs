//! Maps domain errors onto HTTP responses.
//!
//! Body shape: `{"error": {"code": "...", "message": "..."}}`. Conflicts additionally carry
//! the current `status` of the resource at the top level.

use crate::domain::DomainError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// Error type returned by every handler.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(DomainError::InvalidInput(rejection.body_text()))
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            DomainError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Conflict { .. } | DomainError::TerminalStatus { .. } => {
                StatusCode::CONFLICT
            }
            DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match &self.0 {
            DomainError::InvalidInput(_) => "invalid_input",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict { .. } => "conflict",
            DomainError::TerminalStatus { .. } => "already_finished",
            DomainError::Unauthorized(_) => "unauthorized",
            DomainError::Forbidden(_) => "forbidden",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let mut body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.0.to_string(),
            }
        });
        match &self.0 {
            DomainError::Conflict { status, .. } => body["status"] = json!(status),
            DomainError::TerminalStatus { status, .. } => body["status"] = json!(status),
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}
