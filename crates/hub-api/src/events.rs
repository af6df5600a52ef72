//! Event ingestion and event log endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use hub_core::{Event, NewEvent};
use hub_recorder::RecorderError;
use serde::Deserialize;
use tracing::error;

use crate::{api_error, ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventFilter {
    /// Only events reported by this device
    device_id: Option<String>,
}

/// POST /api/events - Queue an event for the reactor
pub(crate) async fn post_event(
    State(state): State<AppState>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let Json(new_event) =
        payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

    match state.producer.try_enqueue(new_event).await {
        Ok(event) => Ok((StatusCode::ACCEPTED, Json(event))),
        Err(e) => {
            error!(error = %e, "Failed to queue event");
            Err(api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Event queue unavailable: {}", e),
            ))
        }
    }
}

/// GET /api/events[?device_id=...] - Logged events in the order consumed
pub(crate) async fn list_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = match filter.device_id {
        Some(device_id) => state.events.find_by_device(&device_id).await,
        None => state.events.find_all().await,
    };
    events.map(Json).map_err(recorder_error)
}

/// GET /api/events/{event_id}
pub(crate) async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    state
        .events
        .get(&event_id)
        .await
        .map_err(recorder_error)?
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Event not found: {}", event_id),
            )
        })
}

fn recorder_error(err: RecorderError) -> ApiError {
    error!(error = %err, "Event log failure");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
