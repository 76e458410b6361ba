//! Relational repository integration tests.
//!
//! Tests the `room_info` and `recordings` tables using `#[sqlx::test]` for
//! isolated test databases.

use chrono::{TimeZone, Utc};
use rc_service::repositories::{
    NewRecording, NewRoom, PgRecordingRepository, PgRoomRepository, RecordingRepository,
    RecordingStatusPatch, RoomRepository, RoomSelector, RoomStatusPatch, RtmpStatusPatch,
};
use sqlx::PgPool;

async fn insert_room(repo: &PgRoomRepository, sid: &str, is_running: bool) -> i64 {
    repo.insert_room(&NewRoom {
        room_id: "room1".to_string(),
        room_title: "Weekly".to_string(),
        sid: sid.to_string(),
        is_running,
    })
    .await
    .expect("room inserts")
}

/// Stopping an already-stopped room changes nothing.
#[sqlx::test(migrations = "../../migrations")]
async fn test_stop_already_stopped_room_is_no_op(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let id = insert_room(&repo, "sidABC", false).await;

    let rows = repo
        .update_room_status(&RoomStatusPatch::stopped(RoomSelector::Sid(
            "sidABC".to_string(),
        )))
        .await?;

    assert_eq!(rows, 0);
    let room = repo.get_room_by_table_id(id).await?.expect("room exists");
    assert_eq!(room.ended, None);

    Ok(())
}

/// Stopping a running room clears both feature flags and stamps the end.
#[sqlx::test(migrations = "../../migrations")]
async fn test_stop_clears_flags_and_sets_ended(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let id = insert_room(&repo, "sidABC", true).await;
    repo.update_recording_status(&RecordingStatusPatch::new(id, true, "recorder-a"))
        .await?;
    repo.update_rtmp_status(&RtmpStatusPatch::new(id, true, "rtmp-node-1"))
        .await?;

    let stopped_at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
    let rows = repo
        .update_room_status(&RoomStatusPatch::stopped_at(
            RoomSelector::TableId(id),
            stopped_at,
        ))
        .await?;

    assert_eq!(rows, 1);
    let room = repo.get_room_by_table_id(id).await?.expect("room exists");
    assert!(!room.is_running);
    assert!(!room.is_recording);
    assert!(!room.is_active_rtmp);
    assert_eq!(room.recorder_id, "recorder-a");
    assert_eq!(room.rtmp_node_id, "rtmp-node-1");
    assert_eq!(room.ended, Some(stopped_at.naive_utc()));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_start_touches_running_only(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let id = insert_room(&repo, "sidABC", false).await;

    let rows = repo
        .update_room_status(&RoomStatusPatch::running(RoomSelector::RoomId(
            "room1".to_string(),
        )))
        .await?;
    let again = repo
        .update_room_status(&RoomStatusPatch::running(RoomSelector::TableId(id)))
        .await?;

    assert_eq!(rows, 1);
    assert_eq!(again, 0);
    let room = repo.get_room_by_table_id(id).await?.expect("room exists");
    assert!(room.is_running);
    assert_eq!(room.ended, None);

    Ok(())
}

/// An empty recorder id keeps the stored one.
#[sqlx::test(migrations = "../../migrations")]
async fn test_recording_flag_keeps_recorder_when_absent(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let id = insert_room(&repo, "sidABC", true).await;

    repo.update_recording_status(&RecordingStatusPatch::new(id, true, "recorder-a"))
        .await?;
    repo.update_recording_status(&RecordingStatusPatch::new(id, false, ""))
        .await?;

    let room = repo.get_room_by_table_id(id).await?.expect("room exists");
    assert!(!room.is_recording);
    assert_eq!(room.recorder_id, "recorder-a");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_participant_count_clamped_at_zero(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);
    let id = insert_room(&repo, "sidABC", true).await;

    repo.adjust_joined_participants("sidABC", 3).await?;
    repo.adjust_joined_participants("sidABC", -1).await?;
    assert_eq!(
        repo.get_room_by_table_id(id).await?.unwrap().joined_participants,
        2
    );

    repo.adjust_joined_participants("sidABC", -10).await?;
    assert_eq!(
        repo.get_room_by_table_id(id).await?.unwrap().joined_participants,
        0
    );

    repo.set_joined_participants("sidABC", -4).await?;
    assert_eq!(
        repo.get_room_by_table_id(id).await?.unwrap().joined_participants,
        0
    );

    assert_eq!(repo.set_joined_participants("unknown", 1).await?, 0);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_missing_room_is_none(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRoomRepository::new(pool);

    assert!(repo.get_room_by_table_id(999).await?.is_none());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_insert_recording_returns_creation_time(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRecordingRepository::new(pool.clone());
    let before = Utc::now().timestamp();

    let creation_time = repo
        .insert_recording(&NewRecording {
            record_id: "rec-1".to_string(),
            room_id: "room1".to_string(),
            room_sid: "sidABC".to_string(),
            recorder_id: "recorder-a".to_string(),
            file_path: "room1/rec-1.mp4".to_string(),
            file_size: 4096,
            room_creation_time: 1_700_000_000,
        })
        .await?;

    assert!(creation_time >= before - 1);
    let (stored,): (i64,) =
        sqlx::query_as("SELECT file_size FROM recordings WHERE record_id = 'rec-1'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(stored, 4096);

    Ok(())
}

/// Recording ids are unique; a duplicate report is an error.
#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_recording_rejected(pool: PgPool) -> Result<(), anyhow::Error> {
    let repo = PgRecordingRepository::new(pool);
    let recording = NewRecording {
        record_id: "rec-1".to_string(),
        room_id: "room1".to_string(),
        room_sid: "sidABC".to_string(),
        file_path: "rec-1.mp4".to_string(),
        ..NewRecording::default()
    };

    repo.insert_recording(&recording).await?;
    assert!(repo.insert_recording(&recording).await.is_err());

    Ok(())
}
