use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::domain::OperationRecord;
use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

/// GET /operations
pub async fn list_operations(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "operations": state.registry.list().await }))
}

/// GET /operations/:id
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OperationRecord>, ApiError> {
    Ok(Json(state.registry.get(&id).await?))
}
