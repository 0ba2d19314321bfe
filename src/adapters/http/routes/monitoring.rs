//! Monitoring instances: start, list, stop.

use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::adapters::http::routes::optional_json;
use crate::domain::DomainError;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Body of `POST /monitoring`; omit `user` to watch every known account.
#[derive(Debug, Default, Deserialize)]
pub struct StartMonitoring {
    #[serde(default)]
    pub user: Option<String>,
}

/// POST /monitoring
pub async fn start_monitoring(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req: StartMonitoring = optional_json(&body)?;
    let record = state.monitor.start(req.user.as_deref()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": record.status,
            "instance_id": record.id,
            "message": "monitoring started",
        })),
    ))
}

/// GET /monitoring: instances keyed by id.
pub async fn list_monitoring(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut instances = Map::new();
    for record in state.monitor.list().await {
        let id = record.id.clone();
        instances.insert(
            id,
            serde_json::to_value(record).map_err(|e| DomainError::Storage(e.to_string()))?,
        );
    }
    let running = state.monitor.running_instances().await?;
    Ok(Json(json!({ "instances": instances, "running": running })))
}

/// DELETE /monitoring/:instance_id
pub async fn stop_monitoring(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state.monitor.stop(&instance_id).await?;
    Ok(Json(json!({
        "status": record.status,
        "instance_id": record.id,
        "message": "monitoring is stopping",
    })))
}
