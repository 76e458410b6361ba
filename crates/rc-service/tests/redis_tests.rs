//! Redis backend integration tests.
//!
//! These need a running Redis and are ignored by default. Run with:
//!
//! ```bash
//! RC_TEST_REDIS_URL=redis://127.0.0.1:6379 cargo test -p rc-service --test redis_tests -- --ignored
//! ```

use rc_service::capabilities::{
    room_stream_key, ConsumerBackend, ConsumerStatus, RedisConsumerBackend,
};
use rc_service::kv::{KvStore, RedisKvStore};
use rc_service::room_state::room_info_bucket;
use redis::AsyncCommands;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn connect() -> RedisKvStore {
    let url =
        std::env::var("RC_TEST_REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
    RedisKvStore::connect(&url).await.expect("redis reachable")
}

/// Room id that no other test run shares.
fn unique_room() -> String {
    format!("room-{}", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore = "requires Redis; set RC_TEST_REDIS_URL"]
async fn test_consumer_is_created_then_found() {
    let kv = connect().await;
    let backend = RedisConsumerBackend::new(kv.connection());
    let room = unique_room();

    let first = backend.ensure_consumer(&room, "chat_user42").await.unwrap();
    let second = backend.ensure_consumer(&room, "chat_user42").await.unwrap();
    let other = backend.ensure_consumer(&room, "chat_user43").await.unwrap();

    assert_eq!(first, ConsumerStatus::Created);
    assert_eq!(second, ConsumerStatus::Existing);
    assert_eq!(other, ConsumerStatus::Created);

    let mut conn = kv.connection();
    let _: () = conn.del(room_stream_key(&room)).await.unwrap();
}

/// Concurrent duplicate requests converge on one consumer group.
#[tokio::test]
#[ignore = "requires Redis; set RC_TEST_REDIS_URL"]
async fn test_concurrent_duplicates_create_once() {
    let kv = connect().await;
    let backend = RedisConsumerBackend::new(kv.connection());
    let room = unique_room();

    let results = ensure_concurrently(&backend, &room).await;

    let created = results
        .iter()
        .filter(|status| **status == ConsumerStatus::Created)
        .count();
    assert_eq!(created, 1);
    assert_eq!(results.len(), 5);

    let mut conn = kv.connection();
    let groups: redis::streams::StreamInfoGroupsReply =
        conn.xinfo_groups(room_stream_key(&room)).await.unwrap();
    assert_eq!(groups.groups.len(), 1);
    let _: () = conn.del(room_stream_key(&room)).await.unwrap();
}

async fn ensure_concurrently(backend: &RedisConsumerBackend, room: &str) -> Vec<ConsumerStatus> {
    let mut tasks = Vec::new();
    for _ in 0..5 {
        let backend = backend.clone();
        let room = room.to_string();
        tasks.push(tokio::spawn(async move {
            backend.ensure_consumer(&room, "chat_user42").await
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap().unwrap());
    }
    results
}

#[tokio::test]
#[ignore = "requires Redis; set RC_TEST_REDIS_URL"]
async fn test_kv_bucket_round_trip() {
    let kv = connect().await;
    let bucket = room_info_bucket(&unique_room());

    assert!(!kv.bucket_exists(&bucket).await.unwrap());
    assert_eq!(kv.get(&bucket, "status").await.unwrap(), None);

    kv.put(&bucket, "status", "running").await.unwrap();

    assert!(kv.bucket_exists(&bucket).await.unwrap());
    assert_eq!(
        kv.get(&bucket, "status").await.unwrap().as_deref(),
        Some("running")
    );

    let mut conn = kv.connection();
    let _: () = conn.del(format!("kv:{bucket}")).await.unwrap();
}
