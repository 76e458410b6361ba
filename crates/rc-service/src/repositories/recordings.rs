//! Recording outputs.

use super::timed;
use crate::errors::RcError;
use sqlx::PgPool;
use tracing::instrument;

/// Fields of a recording output reported by a recorder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRecording {
    pub record_id: String,
    pub room_id: String,
    pub room_sid: String,
    pub recorder_id: String,
    pub file_path: String,
    pub file_size: i64,
    /// Unix seconds.
    pub room_creation_time: i64,
}

#[async_trait::async_trait]
pub trait RecordingRepository: Send + Sync {
    /// Insert a recording row and return its generated creation time
    /// (unix seconds).
    async fn insert_recording(&self, recording: &NewRecording) -> Result<i64, RcError>;
}

#[derive(Clone)]
pub struct PgRecordingRepository {
    pool: PgPool,
}

impl PgRecordingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordingRepository for PgRecordingRepository {
    #[instrument(skip_all, fields(room_id = %recording.room_id, sid = %recording.room_sid))]
    async fn insert_recording(&self, recording: &NewRecording) -> Result<i64, RcError> {
        let (creation_time,): (i64,) = timed(
            "insert_recording",
            sqlx::query_as(
                r#"
                INSERT INTO recordings (
                    record_id, room_id, room_sid, recorder_id,
                    file_path, file_size, room_creation_time
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING creation_time
                "#,
            )
            .bind(&recording.record_id)
            .bind(&recording.room_id)
            .bind(&recording.room_sid)
            .bind(&recording.recorder_id)
            .bind(&recording.file_path)
            .bind(recording.file_size)
            .bind(recording.room_creation_time)
            .fetch_one(&self.pool),
        )
        .await?;

        Ok(creation_time)
    }
}
