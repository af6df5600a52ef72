//! Consequence endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use hub_core::Consequence;
use serde::Deserialize;

use crate::{lifecycle_error, ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConsequenceFilter {
    /// Only consequences produced by this event
    event_id: Option<String>,
}

/// GET /api/consequences[?event_id=...]
pub(crate) async fn list_consequences(
    State(state): State<AppState>,
    Query(filter): Query<ConsequenceFilter>,
) -> Result<Json<Vec<Consequence>>, ApiError> {
    let consequences = match filter.event_id {
        Some(event_id) => state.consequences.for_event(&event_id).await,
        None => state.consequences.list().await,
    };
    consequences.map(Json).map_err(lifecycle_error)
}

/// GET /api/consequences/{consequence_id}
pub(crate) async fn get_consequence(
    State(state): State<AppState>,
    Path(consequence_id): Path<String>,
) -> Result<Json<Consequence>, ApiError> {
    state
        .consequences
        .get(&consequence_id)
        .await
        .map(Json)
        .map_err(lifecycle_error)
}

/// PUT /api/consequences/{consequence_id}/execute - Mark as executed
pub(crate) async fn execute_consequence(
    State(state): State<AppState>,
    Path(consequence_id): Path<String>,
) -> Result<Json<Consequence>, ApiError> {
    state
        .consequences
        .mark_executed(&consequence_id)
        .await
        .map(Json)
        .map_err(lifecycle_error)
}
