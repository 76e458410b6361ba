//! Room lifecycle and recorder signal endpoints.

use crate::errors::RcError;
use crate::routes::AppState;
use crate::services::RecorderEvent;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Body of POST /internal/rooms/status. The row is chosen by the first
/// usable identifier in the order table id, room id, sid.
#[derive(Debug, Deserialize)]
pub struct RoomStatusRequest {
    #[serde(default)]
    pub table_id: Option<i64>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
    pub is_running: bool,
}

/// Body of POST /internal/rooms/:sid/participants. Exactly one of `count`
/// (absolute) or `delta` (signed change) must be given.
#[derive(Debug, Deserialize)]
pub struct ParticipantsRequest {
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub delta: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RowsAffectedResponse {
    pub rows_affected: u64,
}

/// Handler for POST /internal/recorder/events
#[instrument(skip_all, name = "rc.recorder.event")]
pub async fn recorder_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<RecorderEvent>,
) -> Result<StatusCode, RcError> {
    state.state_sync.handle_recorder_event(&event).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /internal/rooms/status
#[instrument(skip_all, name = "rc.rooms.status")]
pub async fn update_room_status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RoomStatusRequest>,
) -> Result<Json<RowsAffectedResponse>, RcError> {
    let rows_affected = state
        .state_sync
        .set_room_running(
            request.table_id,
            request.room_id.as_deref(),
            request.sid.as_deref(),
            request.is_running,
        )
        .await?;
    Ok(Json(RowsAffectedResponse { rows_affected }))
}

/// Handler for POST /internal/rooms/:sid/participants
#[instrument(skip_all, name = "rc.rooms.participants")]
pub async fn update_participants(
    State(state): State<Arc<AppState>>,
    Path(sid): Path<String>,
    Json(request): Json<ParticipantsRequest>,
) -> Result<Json<RowsAffectedResponse>, RcError> {
    let rows_affected = match (request.count, request.delta) {
        (Some(count), None) => state.state_sync.set_joined_participants(&sid, count).await?,
        (None, Some(delta)) => state.state_sync.adjust_joined_participants(&sid, delta).await?,
        _ => {
            return Err(RcError::InvalidRequest(
                "exactly one of count or delta is required".to_string(),
            ))
        }
    };
    Ok(Json(RowsAffectedResponse { rows_affected }))
}
