//! GET /events: Server-Sent Events view of the event bus.
//!
//! The SSE event name is the topic; data is the payload with a `timestamp` field added.
//! A client that falls behind receives an `error` event carrying the number of skipped events.

use crate::adapters::http::AppState;
use crate::adapters::http::error::ApiError;
use crate::domain::{DomainError, Event, Topic};
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub topic: Option<String>,
}

pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let filter = match query.topic.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(name) => Some(
            Topic::parse(name)
                .ok_or_else(|| DomainError::InvalidInput(format!("unknown topic '{}'", name)))?,
        ),
    };

    let subscription = state.events.subscribe(filter);
    let stream =
        BroadcastStream::new(subscription.into_receiver()).filter_map(move |item| match item {
            Ok(event) if filter.is_none_or(|t| t == event.topic) => Some(Ok(to_sse(&event))),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "SSE client lagged, events dropped");
                Some(Ok(SseEvent::default()
                    .event("error")
                    .data(json!({ "skipped": skipped }).to_string())))
            }
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &Event) -> SseEvent {
    let mut data = match &event.payload {
        Value::Object(map) => Value::Object(map.clone()),
        other => json!({ "payload": other }),
    };
    data["timestamp"] = json!(event.timestamp);
    SseEvent::default()
        .event(event.topic.as_str())
        .data(data.to_string())
}
