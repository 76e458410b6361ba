//! Room records.
//!
//! # Security
//!
//! - All values are bound parameters; the only interpolated SQL is the
//!   selector column, chosen from a fixed set
//! - Session ids and room ids are logged, nothing else

use super::timed;
use crate::errors::RcError;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Layout of the `ended` column as written by status transitions.
pub const ENDED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which row a status transition targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSelector {
    TableId(i64),
    RoomId(String),
    Sid(String),
}

impl RoomSelector {
    /// Pick the most specific identifier given: table id, then room id,
    /// then session id. Empty strings and non-positive ids count as absent.
    pub fn resolve(table_id: Option<i64>, room_id: Option<&str>, sid: Option<&str>) -> Option<Self> {
        if let Some(id) = table_id.filter(|id| *id > 0) {
            return Some(RoomSelector::TableId(id));
        }
        if let Some(room_id) = room_id.filter(|r| !r.is_empty()) {
            return Some(RoomSelector::RoomId(room_id.to_string()));
        }
        sid.filter(|s| !s.is_empty())
            .map(|s| RoomSelector::Sid(s.to_string()))
    }

    fn column(&self) -> &'static str {
        match self {
            RoomSelector::TableId(_) => "id",
            RoomSelector::RoomId(_) => "room_id",
            RoomSelector::Sid(_) => "sid",
        }
    }
}

/// Running-state transition for one room.
///
/// Stopping a room also clears the recording and RTMP flags and stamps the
/// end time; starting it touches `is_running` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatusPatch {
    selector: RoomSelector,
    is_running: bool,
    ended: Option<NaiveDateTime>,
}

impl RoomStatusPatch {
    pub fn running(selector: RoomSelector) -> Self {
        Self {
            selector,
            is_running: true,
            ended: None,
        }
    }

    pub fn stopped(selector: RoomSelector) -> Self {
        Self::stopped_at(selector, Utc::now())
    }

    pub fn stopped_at(selector: RoomSelector, now: DateTime<Utc>) -> Self {
        Self {
            selector,
            is_running: false,
            ended: Some(now.naive_utc()),
        }
    }

    pub fn selector(&self) -> &RoomSelector {
        &self.selector
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// End time as stored, in UTC.
    pub fn ended(&self) -> Option<String> {
        self.ended
            .map(|t| t.format(ENDED_TIMESTAMP_FORMAT).to_string())
    }
}

/// Recording flag update keyed by table id. An empty recorder id leaves
/// the stored one untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingStatusPatch {
    pub table_id: i64,
    pub is_recording: bool,
    pub recorder_id: Option<String>,
}

impl RecordingStatusPatch {
    pub fn new(table_id: i64, is_recording: bool, recorder_id: &str) -> Self {
        Self {
            table_id,
            is_recording,
            recorder_id: (!recorder_id.is_empty()).then(|| recorder_id.to_string()),
        }
    }
}

/// RTMP flag update keyed by table id. An empty node id leaves the stored
/// one untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmpStatusPatch {
    pub table_id: i64,
    pub is_active_rtmp: bool,
    pub rtmp_node_id: Option<String>,
}

impl RtmpStatusPatch {
    pub fn new(table_id: i64, is_active_rtmp: bool, rtmp_node_id: &str) -> Self {
        Self {
            table_id,
            is_active_rtmp,
            rtmp_node_id: (!rtmp_node_id.is_empty()).then(|| rtmp_node_id.to_string()),
        }
    }
}

/// Fields of a new room row.
#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub room_id: String,
    pub room_title: String,
    pub sid: String,
    pub is_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RoomRecord {
    pub id: i64,
    pub room_id: String,
    pub room_title: String,
    pub sid: String,
    pub is_running: bool,
    pub is_recording: bool,
    pub is_active_rtmp: bool,
    pub recorder_id: String,
    pub rtmp_node_id: String,
    pub joined_participants: i64,
    pub ended: Option<NaiveDateTime>,
    /// Unix seconds.
    pub creation_time: i64,
}

#[async_trait::async_trait]
pub trait RoomRepository: Send + Sync {
    /// Apply a running-state transition unless the row already has the
    /// target state. Returns rows affected.
    async fn update_room_status(&self, patch: &RoomStatusPatch) -> Result<u64, RcError>;

    async fn update_recording_status(&self, patch: &RecordingStatusPatch) -> Result<u64, RcError>;

    async fn update_rtmp_status(&self, patch: &RtmpStatusPatch) -> Result<u64, RcError>;

    /// Overwrite the participant count of the incarnation `sid`.
    async fn set_joined_participants(&self, sid: &str, count: i64) -> Result<u64, RcError>;

    /// Add `delta` to the participant count of the incarnation `sid`,
    /// never going below zero.
    async fn adjust_joined_participants(&self, sid: &str, delta: i64) -> Result<u64, RcError>;

    /// Insert a room row, returning its table id.
    async fn insert_room(&self, room: &NewRoom) -> Result<i64, RcError>;

    async fn get_room_by_table_id(&self, table_id: i64) -> Result<Option<RoomRecord>, RcError>;
}

/// Postgres-backed [`RoomRepository`].
#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ROOM_COLUMNS: &str = "id, room_id, room_title, sid, is_running, is_recording, \
     is_active_rtmp, recorder_id, rtmp_node_id, joined_participants, ended, creation_time";

#[async_trait::async_trait]
impl RoomRepository for PgRoomRepository {
    #[instrument(skip_all, fields(selector = ?patch.selector(), is_running = patch.is_running()))]
    async fn update_room_status(&self, patch: &RoomStatusPatch) -> Result<u64, RcError> {
        let column = patch.selector().column();
        let sql = match patch.ended() {
            Some(_) => format!(
                "UPDATE room_info \
                 SET is_running = $1, is_recording = FALSE, is_active_rtmp = FALSE, \
                     ended = $3::timestamp \
                 WHERE {column} = $2 AND is_running <> $1"
            ),
            None => format!(
                "UPDATE room_info SET is_running = $1 WHERE {column} = $2 AND is_running <> $1"
            ),
        };

        let query = sqlx::query(&sql).bind(patch.is_running());
        let query = match patch.selector() {
            RoomSelector::TableId(id) => query.bind(*id),
            RoomSelector::RoomId(value) | RoomSelector::Sid(value) => query.bind(value.clone()),
        };
        let query = match patch.ended() {
            Some(ended) => query.bind(ended),
            None => query,
        };

        let result = timed("update_room_status", query.execute(&self.pool)).await?;

        debug!(
            target: "rc.repo.rooms",
            rows_affected = result.rows_affected(),
            "Room status transition applied"
        );
        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(table_id = patch.table_id))]
    async fn update_recording_status(&self, patch: &RecordingStatusPatch) -> Result<u64, RcError> {
        let result = timed(
            "update_recording_status",
            sqlx::query(
                r#"
                UPDATE room_info
                SET is_recording = $1,
                    recorder_id = COALESCE($2, recorder_id)
                WHERE id = $3
                "#,
            )
            .bind(patch.is_recording)
            .bind(patch.recorder_id.as_deref())
            .bind(patch.table_id)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(table_id = patch.table_id))]
    async fn update_rtmp_status(&self, patch: &RtmpStatusPatch) -> Result<u64, RcError> {
        let result = timed(
            "update_rtmp_status",
            sqlx::query(
                r#"
                UPDATE room_info
                SET is_active_rtmp = $1,
                    rtmp_node_id = COALESCE($2, rtmp_node_id)
                WHERE id = $3
                "#,
            )
            .bind(patch.is_active_rtmp)
            .bind(patch.rtmp_node_id.as_deref())
            .bind(patch.table_id)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(sid = %sid))]
    async fn set_joined_participants(&self, sid: &str, count: i64) -> Result<u64, RcError> {
        let result = timed(
            "set_joined_participants",
            sqlx::query("UPDATE room_info SET joined_participants = $1 WHERE sid = $2")
                .bind(count.max(0))
                .bind(sid)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(sid = %sid, delta = delta))]
    async fn adjust_joined_participants(&self, sid: &str, delta: i64) -> Result<u64, RcError> {
        let result = timed(
            "adjust_joined_participants",
            sqlx::query(
                r#"
                UPDATE room_info
                SET joined_participants = GREATEST(joined_participants + $1, 0)
                WHERE sid = $2
                "#,
            )
            .bind(delta)
            .bind(sid)
            .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip_all, fields(room_id = %room.room_id, sid = %room.sid))]
    async fn insert_room(&self, room: &NewRoom) -> Result<i64, RcError> {
        let (id,): (i64,) = timed(
            "insert_room",
            sqlx::query_as(
                r#"
                INSERT INTO room_info (room_id, room_title, sid, is_running)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(&room.room_id)
            .bind(&room.room_title)
            .bind(&room.sid)
            .bind(room.is_running)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(id)
    }

    #[instrument(skip_all, fields(table_id = table_id))]
    async fn get_room_by_table_id(&self, table_id: i64) -> Result<Option<RoomRecord>, RcError> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM room_info WHERE id = $1");
        let row: Option<RoomRecord> = timed(
            "get_room_by_table_id",
            sqlx::query_as(&sql).bind(table_id).fetch_optional(&self.pool),
        )
        .await?;

        Ok(row)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_selector_priority() {
        assert_eq!(
            RoomSelector::resolve(Some(7), Some("room1"), Some("sidABC")),
            Some(RoomSelector::TableId(7))
        );
        assert_eq!(
            RoomSelector::resolve(None, Some("room1"), Some("sidABC")),
            Some(RoomSelector::RoomId("room1".to_string()))
        );
        assert_eq!(
            RoomSelector::resolve(Some(0), Some(""), Some("sidABC")),
            Some(RoomSelector::Sid("sidABC".to_string()))
        );
        assert_eq!(RoomSelector::resolve(None, None, Some("")), None);
    }

    #[test]
    fn test_stopped_stamps_fixed_utc_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let patch = RoomStatusPatch::stopped_at(RoomSelector::Sid("sidABC".into()), now);

        assert!(!patch.is_running());
        assert_eq!(patch.ended().as_deref(), Some("2024-03-09 07:05:01"));
    }

    #[test]
    fn test_running_has_no_end_time() {
        let patch = RoomStatusPatch::running(RoomSelector::TableId(1));
        assert!(patch.is_running());
        assert_eq!(patch.ended(), None);
    }

    #[test]
    fn test_empty_recorder_id_is_not_written() {
        assert_eq!(RecordingStatusPatch::new(3, true, "").recorder_id, None);
        assert_eq!(
            RecordingStatusPatch::new(3, true, "rec-1").recorder_id.as_deref(),
            Some("rec-1")
        );
        assert_eq!(RtmpStatusPatch::new(3, false, "").rtmp_node_id, None);
    }
}
