use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::domain::DomainError;
use axum::Json;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use serde_json::{Value, json};

/// GET /groups: re-fetch the groups of every authorized user, then list all stored ones.
pub async fn list_groups(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let groups = state.groups.refresh().await?;
    Ok(Json(json!({ "groups": groups })))
}

/// GET /groups/:group_id/link
pub async fn group_link(
    State(state): State<AppState>,
    group_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(group_id) =
        group_id.map_err(|e| DomainError::InvalidInput(format!("group_id: {}", e.body_text())))?;
    let link = state.groups.link(group_id).await?;
    Ok(Json(json!({ "group_id": group_id, "link": link })))
}
