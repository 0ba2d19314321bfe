//! Route handlers, grouped by resource.

pub mod archives;
pub mod events;
pub mod groups;
pub mod monitoring;
pub mod operations;
pub mod system;
pub mod tokens;
pub mod users;

use crate::adapters::http::error::ApiError;
use crate::domain::DomainError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use serde::de::DeserializeOwned;

/// Unwrap a JSON body, turning malformed or missing bodies into `invalid_input`.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    let Json(body) = payload?;
    Ok(body)
}

/// Parse an optional JSON body: an empty body yields `T::default()`.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| DomainError::InvalidInput(format!("invalid JSON body: {}", e)).into())
}
