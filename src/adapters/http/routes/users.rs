//! Accounts and their authentication flows.

use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::adapters::http::routes::json_body;
use crate::usecases::auth_service::AuthStatusView;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

/// Body of `POST /users` and `POST /users/authenticate`.
#[derive(Debug, Deserialize)]
pub struct StartAuthentication {
    pub nickname: String,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCode {
    pub code: String,
}

/// GET /users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let users = state.users.list().await?;
    Ok(Json(json!({ "users": users })))
}

/// POST /users: register an account whose session is already signed in.
pub async fn add_user(
    State(state): State<AppState>,
    payload: Result<Json<StartAuthentication>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req = json_body(payload)?;
    let user = state.users.add(&req.nickname, &req.phone).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "success",
            "message": format!("user '{}' added", user.nickname),
            "user": user,
        })),
    ))
}

/// DELETE /users/:nickname
pub async fn delete_user(
    State(state): State<AppState>,
    Path(nickname): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.users.delete(&nickname).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("user '{}' removed", nickname),
    })))
}

/// POST /users/authenticate
pub async fn start_authentication(
    State(state): State<AppState>,
    payload: Result<Json<StartAuthentication>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(payload)?;
    let ticket = state.auth.start(&req.nickname, &req.phone).await?;
    Ok(Json(json!({
        "status": ticket.status,
        "auth_id": ticket.auth_id,
        "message": "authentication started; follow auth_status events for progress",
    })))
}

/// POST /users/authenticate/:auth_id/code
pub async fn submit_code(
    State(state): State<AppState>,
    Path(auth_id): Path<String>,
    payload: Result<Json<SubmitCode>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let req = json_body(payload)?;
    state.auth.supply_code(&auth_id, &req.code).await?;
    Ok(Json(json!({
        "status": "processing",
        "auth_id": auth_id,
        "message": "verification code received",
    })))
}

/// GET /users/authenticate/:auth_id/status
pub async fn authentication_status(
    State(state): State<AppState>,
    Path(auth_id): Path<String>,
) -> Result<Json<AuthStatusView>, ApiError> {
    Ok(Json(state.auth.status(&auth_id).await?))
}
