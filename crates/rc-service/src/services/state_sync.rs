//! Keeps the relational room record, the room's KV namespace and clients in
//! step.
//!
//! The three stores are updated one after another with no transaction
//! around them. Each step after the primary one is fail-open: it logs,
//! counts the failure in `rc_side_effect_failures_total` and lets the
//! remaining steps run. Nothing is rolled back.
//!
//! The only fatal side effect is inserting a new recording row, since its
//! creation time is needed for the audit file.

use crate::errors::RcError;
use crate::models::RoomMetadata;
use crate::observability::metrics::record_side_effect_failure;
use crate::repositories::{
    NewRecording, RecordingRepository, RecordingStatusPatch, RoomRecord, RoomRepository,
    RoomSelector, RoomStatusPatch, RtmpStatusPatch,
};
use crate::room_state::RoomStateStore;
use crate::services::notifications::NotificationBroadcaster;
use crate::services::recording_audit::{RecordingAuditRecord, RecordingAuditWriter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

pub const RECORDING_STARTED_MSG: &str = "notifications.recording-started";
pub const RECORDING_ENDED_MSG: &str = "notifications.recording-ended";
pub const RTMP_STARTED_MSG: &str = "notifications.rtmp-started";
pub const RTMP_ENDED_MSG: &str = "notifications.rtmp-ended";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no room identifier given")]
    MissingRoomIdentifier,

    #[error(transparent)]
    Repository(#[from] RcError),
}

/// What a recorder reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderTask {
    RecordingStarted,
    RecordingEnded,
    RtmpStarted,
    RtmpEnded,
    /// A finished recording file is available.
    RecordingOutput,
}

/// A recorder signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderEvent {
    pub task: RecorderTask,
    pub room_table_id: i64,
    pub room_id: String,
    #[serde(default)]
    pub room_sid: String,
    #[serde(default)]
    pub recorder_id: String,
    #[serde(default)]
    pub recording_id: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub file_size: i64,
    /// Unix seconds.
    #[serde(default)]
    pub room_creation_time: i64,
}

#[derive(Debug, Clone, Copy)]
enum Feature {
    Recording,
    Rtmp,
}

pub struct StateSyncBridge {
    rooms: Arc<dyn RoomRepository>,
    recordings: Arc<dyn RecordingRepository>,
    room_state: RoomStateStore,
    broadcaster: NotificationBroadcaster,
    audit: RecordingAuditWriter,
}

impl StateSyncBridge {
    pub fn new(
        rooms: Arc<dyn RoomRepository>,
        recordings: Arc<dyn RecordingRepository>,
        room_state: RoomStateStore,
        broadcaster: NotificationBroadcaster,
        audit: RecordingAuditWriter,
    ) -> Self {
        Self {
            rooms,
            recordings,
            room_state,
            broadcaster,
            audit,
        }
    }

    /// Apply a running-state transition. Returns rows affected; 0 means the
    /// row was already in the target state (or does not exist).
    ///
    /// # Errors
    ///
    /// Repository failure.
    #[instrument(skip_all, fields(selector = ?patch.selector(), is_running = patch.is_running()))]
    pub async fn update_room_status(&self, patch: &RoomStatusPatch) -> Result<u64, SyncError> {
        let rows = self.rooms.update_room_status(patch).await?;
        if rows == 0 {
            info!(target: "rc.state_sync", "Room already in target state, nothing changed");
        }
        Ok(rows)
    }

    /// [`Self::update_room_status`] with the row picked from whichever
    /// identifiers are given (table id, then room id, then sid).
    ///
    /// # Errors
    ///
    /// `MissingRoomIdentifier` if none is usable, or repository failure.
    pub async fn set_room_running(
        &self,
        table_id: Option<i64>,
        room_id: Option<&str>,
        sid: Option<&str>,
        is_running: bool,
    ) -> Result<u64, SyncError> {
        let selector =
            RoomSelector::resolve(table_id, room_id, sid).ok_or(SyncError::MissingRoomIdentifier)?;
        let patch = if is_running {
            RoomStatusPatch::running(selector)
        } else {
            RoomStatusPatch::stopped(selector)
        };
        self.update_room_status(&patch).await
    }

    #[instrument(skip_all, fields(room_id = %event.room_id))]
    pub async fn recording_started(&self, event: &RecorderEvent) {
        self.feature_changed(event, Feature::Recording, true).await;
    }

    #[instrument(skip_all, fields(room_id = %event.room_id))]
    pub async fn recording_ended(&self, event: &RecorderEvent) {
        self.feature_changed(event, Feature::Recording, false).await;
    }

    #[instrument(skip_all, fields(room_id = %event.room_id))]
    pub async fn rtmp_started(&self, event: &RecorderEvent) {
        self.feature_changed(event, Feature::Rtmp, true).await;
    }

    #[instrument(skip_all, fields(room_id = %event.room_id))]
    pub async fn rtmp_ended(&self, event: &RecorderEvent) {
        self.feature_changed(event, Feature::Rtmp, false).await;
    }

    /// Persist a finished recording and write its audit file.
    ///
    /// Returns the creation time generated by the relational insert.
    ///
    /// # Errors
    ///
    /// Only a failed insert. Room context lookup and the audit file are
    /// fail-open.
    #[instrument(skip_all, fields(room_id = %event.room_id, sid = %event.room_sid))]
    pub async fn add_recording_info(&self, event: &RecorderEvent) -> Result<i64, SyncError> {
        let room = match self.rooms.get_room_by_table_id(event.room_table_id).await {
            Ok(room) => room,
            Err(e) => {
                warn!(target: "rc.state_sync", error = %e, "Room context unavailable for recording");
                record_side_effect_failure("room_context");
                None
            }
        };

        let room_creation_time = room
            .as_ref()
            .map_or(event.room_creation_time, |r| r.creation_time);

        let creation_time = self
            .recordings
            .insert_recording(&NewRecording {
                record_id: event.recording_id.clone(),
                room_id: event.room_id.clone(),
                room_sid: event.room_sid.clone(),
                recorder_id: event.recorder_id.clone(),
                file_path: event.file_path.clone(),
                file_size: event.file_size,
                room_creation_time,
            })
            .await
            .map_err(|e| {
                error!(target: "rc.state_sync", error = %e, "Failed to insert recording");
                e
            })?;

        let record = audit_record(event, room.as_ref(), creation_time);
        if let Err(e) = self.audit.write(&record).await {
            error!(target: "rc.state_sync", error = %e, "Failed to write recording audit file");
            record_side_effect_failure("audit_file");
        }

        Ok(creation_time)
    }

    /// Overwrite the participant count of one room incarnation.
    ///
    /// # Errors
    ///
    /// Repository failure.
    #[instrument(skip_all, fields(sid = %sid))]
    pub async fn set_joined_participants(&self, sid: &str, count: i64) -> Result<u64, SyncError> {
        Ok(self.rooms.set_joined_participants(sid, count).await?)
    }

    /// Add `delta` (negative to decrement) to the participant count of one
    /// room incarnation.
    ///
    /// # Errors
    ///
    /// Repository failure.
    #[instrument(skip_all, fields(sid = %sid, delta = delta))]
    pub async fn adjust_joined_participants(&self, sid: &str, delta: i64) -> Result<u64, SyncError> {
        Ok(self.rooms.adjust_joined_participants(sid, delta).await?)
    }

    /// Route a recorder signal.
    ///
    /// # Errors
    ///
    /// Only `RecordingOutput` can fail, see [`Self::add_recording_info`].
    pub async fn handle_recorder_event(&self, event: &RecorderEvent) -> Result<(), SyncError> {
        match event.task {
            RecorderTask::RecordingStarted => self.recording_started(event).await,
            RecorderTask::RecordingEnded => self.recording_ended(event).await,
            RecorderTask::RtmpStarted => self.rtmp_started(event).await,
            RecorderTask::RtmpEnded => self.rtmp_ended(event).await,
            RecorderTask::RecordingOutput => {
                self.add_recording_info(event).await?;
            }
        }
        Ok(())
    }

    async fn feature_changed(&self, event: &RecorderEvent, feature: Feature, active: bool) {
        let room_id = event.room_id.as_str();

        // 1. Relational flag.
        let flag_update = match feature {
            Feature::Recording => {
                let patch = RecordingStatusPatch::new(event.room_table_id, active, &event.recorder_id);
                self.rooms.update_recording_status(&patch).await
            }
            Feature::Rtmp => {
                let patch = RtmpStatusPatch::new(event.room_table_id, active, &event.recorder_id);
                self.rooms.update_rtmp_status(&patch).await
            }
        };
        if let Err(e) = flag_update {
            warn!(target: "rc.state_sync", error = %e, room_id = %room_id, "Failed to update relational flag");
            record_side_effect_failure("relational_flag");
        }

        // 2. Current metadata; without it nothing further is safe.
        let mut metadata = match self.room_state.get_room_metadata(room_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                error!(target: "rc.state_sync", room_id = %room_id, "Room metadata absent, skipping update");
                return;
            }
            Err(e) => {
                error!(target: "rc.state_sync", error = %e, room_id = %room_id, "Room metadata unreadable, skipping update");
                return;
            }
        };

        // 3. Write back and broadcast.
        set_feature_flag(&mut metadata, feature, active);
        match self.room_state.update_room_metadata(room_id, &metadata).await {
            Ok(raw) => {
                if let Err(e) = self.broadcaster.broadcast_metadata(room_id, raw).await {
                    warn!(target: "rc.state_sync", error = %e, room_id = %room_id, "Failed to broadcast metadata");
                    record_side_effect_failure("metadata_broadcast");
                }
            }
            Err(e) => {
                warn!(target: "rc.state_sync", error = %e, room_id = %room_id, "Failed to store metadata");
                record_side_effect_failure("metadata_update");
            }
        }

        // 4. Tell the room.
        let msg = match (feature, active) {
            (Feature::Recording, true) => RECORDING_STARTED_MSG,
            (Feature::Recording, false) => RECORDING_ENDED_MSG,
            (Feature::Rtmp, true) => RTMP_STARTED_MSG,
            (Feature::Rtmp, false) => RTMP_ENDED_MSG,
        };
        if let Err(e) = self.broadcaster.notify_info(room_id, msg, false, None).await {
            warn!(target: "rc.state_sync", error = %e, room_id = %room_id, "Failed to send room notification");
            record_side_effect_failure("info_notification");
        }
    }
}

fn set_feature_flag(metadata: &mut RoomMetadata, feature: Feature, active: bool) {
    match feature {
        Feature::Recording => metadata.is_recording = active,
        Feature::Rtmp => metadata.is_active_rtmp = active,
    }
}

/// Audit document for a recording. Room context falls back to the event's
/// own fields when the room row could not be read.
fn audit_record(event: &RecorderEvent, room: Option<&RoomRecord>, creation_time: i64) -> RecordingAuditRecord {
    RecordingAuditRecord {
        room_table_id: event.room_table_id,
        room_id: event.room_id.clone(),
        room_title: room.map(|r| r.room_title.clone()).unwrap_or_default(),
        room_sid: room.map_or_else(|| event.room_sid.clone(), |r| r.sid.clone()),
        room_creation_time: room.map_or(event.room_creation_time, |r| r.creation_time),
        room_ended: room
            .and_then(|r| r.ended)
            .map_or(0, |t| t.and_utc().timestamp_millis()),
        recording_id: event.recording_id.clone(),
        recorder_id: event.recorder_id.clone(),
        file_path: event.file_path.clone(),
        file_size: event.file_size,
        creation_time,
    }
}
