//! GET /status: liveness, unauthenticated.

use crate::adapters::http::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use serde_json::json;

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    Json(json!({
        "status": "online",
        "version": env!("CARGO_PKG_VERSION"),
        "time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "uptime_secs": (now - state.started_at).num_seconds().max(0),
    }))
}
