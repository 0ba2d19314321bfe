//! Token authentication middleware.
//!
//! `require_api_token` resolves the caller from `Authorization: Bearer <token>` or
//! `X-API-Token: <token>` and stores the [`ApiPrincipal`] in the request extensions.
//! `require_admin` runs after it and only lets admin principals through.

use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::domain::{ApiPrincipal, DomainError, Role};
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

pub const TOKEN_HEADER: &str = "x-api-token";

fn extract_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim());
        }
    }
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub async fn require_api_token(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers()).ok_or_else(|| {
        DomainError::Unauthorized(
            "missing API token; use 'Authorization: Bearer <token>'".into(),
        )
    })?;
    let principal = state.tokens.validate(token).await?;
    tracing::debug!(username = %principal.username, "request authenticated");
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    match request.extensions().get::<ApiPrincipal>() {
        Some(p) if p.role == Role::Admin => Ok(next.run(request).await),
        Some(_) => Err(DomainError::Forbidden("this operation requires the admin role".into()).into()),
        None => Err(DomainError::Unauthorized("missing API token".into()).into()),
    }
}
