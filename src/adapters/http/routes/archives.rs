//! Full-history archive downloads.

use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::adapters::http::routes::json_body;
use crate::domain::DomainError;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

/// Group ids arrive either as JSON numbers or as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GroupIdParam {
    Number(i64),
    Text(String),
}

impl GroupIdParam {
    fn parse(&self) -> Result<i64, DomainError> {
        match self {
            GroupIdParam::Number(id) => Ok(*id),
            GroupIdParam::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| DomainError::InvalidInput(format!("invalid group_id '{}'", s))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartArchive {
    pub user: String,
    pub group_id: GroupIdParam,
}

/// POST /archives
pub async fn start_archive(
    State(state): State<AppState>,
    payload: Result<Json<StartArchive>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req = json_body(payload)?;
    let group_id = req.group_id.parse()?;
    let record = state.archives.start(&req.user, group_id).await?;
    let group = record.metadata.get("group").cloned().unwrap_or_default();
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": record.status,
            "operation_id": record.id,
            "message": format!("archive download started for group {}", group),
        })),
    ))
}

/// GET /archives
pub async fn list_archives(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "operations": state.archives.list().await }))
}
