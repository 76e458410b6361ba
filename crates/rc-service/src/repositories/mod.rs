//! Relational repositories.
//!
//! The `room_info` row is the durable source of truth for a room. Updates
//! are conditional single statements rather than transactions; concurrent
//! writers race and the last writer wins.

mod recordings;
mod rooms;

pub use recordings::{NewRecording, PgRecordingRepository, RecordingRepository};
pub use rooms::{
    NewRoom, PgRoomRepository, RecordingStatusPatch, RoomRecord, RoomRepository, RoomSelector,
    RoomStatusPatch, RtmpStatusPatch, ENDED_TIMESTAMP_FORMAT,
};

use crate::observability::metrics::record_db_query;
use std::future::Future;
use std::time::Instant;

/// Run a query and record its latency under `operation`.
pub(crate) async fn timed<T, E, Fut>(operation: &'static str, query: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let result = query.await;
    let status = if result.is_ok() { "success" } else { "error" };
    record_db_query(operation, status, start.elapsed());
    result
}
