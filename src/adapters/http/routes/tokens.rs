//! Token management (admin only).

use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::adapters::http::routes::json_body;
use crate::domain::{ApiPrincipal, DomainError, Role};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct CreateToken {
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub expiration_days: Option<u32>,
}

/// POST /tokens: issue (or replace) the token of a user. The raw token is only shown here.
pub async fn create_token(
    State(state): State<AppState>,
    payload: Result<Json<CreateToken>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req = json_body(payload)?;
    let role = match req.role.as_deref() {
        None => Role::User,
        Some(r) => Role::parse(r)
            .ok_or_else(|| DomainError::InvalidInput(format!("unknown role '{}'", r)))?,
    };
    let username = req.username.trim();
    let (token, record) = state
        .tokens
        .create(username, role, req.expiration_days)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "username": username,
            "token": token,
            "role": record.role,
            "created": record.created,
            "expiration": record.expiration,
        })),
    ))
}

/// DELETE /tokens/:username
pub async fn revoke_token(
    State(state): State<AppState>,
    Extension(caller): Extension<ApiPrincipal>,
    Path(username): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if caller.username == username {
        return Err(DomainError::InvalidInput("cannot revoke your own token".into()).into());
    }
    if !state.tokens.revoke(&username).await? {
        return Err(DomainError::NotFound(format!("token for '{}'", username)).into());
    }
    Ok(Json(json!({
        "status": "success",
        "message": format!("token for '{}' revoked", username),
    })))
}
