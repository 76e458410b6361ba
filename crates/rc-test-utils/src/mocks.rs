//! In-memory mocks for the Room Controller's collaborator traits.
//!
//! Every mock records what it was asked to do and can be told to fail, so
//! tests can drive each fail-open and fail-closed path.

use rc_service::auth::{AccessTokenError, AccessTokenVerifier, VerifiedAccess};
use rc_service::capabilities::{ConsumerBackend, ConsumerStatus, ProvisionError};
use rc_service::errors::RcError;
use rc_service::kv::{KvError, KvStore};
use rc_service::repositories::{
    NewRecording, NewRoom, RecordingRepository, RecordingStatusPatch, RoomRecord, RoomRepository,
    RoomSelector, RoomStatusPatch, RtmpStatusPatch,
};
use rc_service::room_state::{user_info_bucket, user_keys};
use rc_service::services::{NotificationPublisher, PublishError, RoomEvent};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// KV store
// ============================================================================

/// In-memory bucketed KV store.
#[derive(Default)]
pub struct MockKvStore {
    buckets: Mutex<HashMap<String, HashMap<String, String>>>,
    failing_reads: Mutex<HashSet<(String, String)>>,
    failing_writes: Mutex<HashSet<(String, String)>>,
    unavailable: AtomicBool,
}

impl MockKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bucket.
    pub fn create_bucket(&self, bucket: &str) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default();
    }

    pub fn set(&self, bucket: &str, key: &str, value: &str) {
        self.buckets
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn field(&self, bucket: &str, key: &str) -> Option<String> {
        self.buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|fields| fields.get(key).cloned())
    }

    /// Reads of `bucket`/`key` fail from now on.
    pub fn fail_reads_of(&self, bucket: &str, key: &str) {
        self.failing_reads
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Writes of `bucket`/`key` fail from now on.
    pub fn fail_writes_of(&self, bucket: &str, key: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Every call fails from now on.
    pub fn make_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    /// Minimal participant namespace.
    pub fn seed_user(&self, room_id: &str, user_id: &str) {
        let bucket = user_info_bucket(room_id, user_id);
        self.set(&bucket, user_keys::USER_ID, user_id);
        self.set(&bucket, user_keys::ROOM_ID, room_id);
        self.set(&bucket, user_keys::NAME, user_id);
    }

    fn check_available(&self) -> Result<(), KvError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KvError::Backend("mock store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvStore for MockKvStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, KvError> {
        self.check_available()?;
        Ok(self.buckets.lock().unwrap().contains_key(bucket))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<String>, KvError> {
        self.check_available()?;
        if self
            .failing_reads
            .lock()
            .unwrap()
            .contains(&(bucket.to_string(), key.to_string()))
        {
            return Err(KvError::Backend(format!("mock read failure on {key}")));
        }
        Ok(self.field(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, value: &str) -> Result<(), KvError> {
        self.check_available()?;
        if self
            .failing_writes
            .lock()
            .unwrap()
            .contains(&(bucket.to_string(), key.to_string()))
        {
            return Err(KvError::Backend(format!("mock write failure on {key}")));
        }
        self.set(bucket, key, value);
        Ok(())
    }
}

// ============================================================================
// Consumer backend
// ============================================================================

/// In-memory consumer registry with get-or-create semantics.
#[derive(Default)]
pub struct MockConsumerBackend {
    consumers: Mutex<HashSet<(String, String)>>,
    creations: AtomicUsize,
    calls: AtomicUsize,
    /// Remaining failures per consumer-name prefix; `usize::MAX` = forever.
    failures: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl MockConsumerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Consumers whose name starts with `prefix` always fail.
    pub fn failing_for(self, prefix: &str) -> Self {
        self.failing_times(prefix, usize::MAX)
    }

    /// Consumers whose name starts with `prefix` fail `times` times, then
    /// succeed.
    pub fn failing_times(self, prefix: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(prefix.to_string(), times);
        self
    }

    /// Distinct consumers that exist.
    pub fn consumer_count(&self) -> usize {
        self.consumers.lock().unwrap().len()
    }

    /// Times a consumer was actually created.
    pub fn creations(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn has_consumer(&self, room_id: &str, consumer: &str) -> bool {
        self.consumers
            .lock()
            .unwrap()
            .contains(&(room_id.to_string(), consumer.to_string()))
    }
}

#[async_trait::async_trait]
impl ConsumerBackend for MockConsumerBackend {
    async fn ensure_consumer(
        &self,
        room_id: &str,
        consumer: &str,
    ) -> Result<ConsumerStatus, ProvisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures
                .iter_mut()
                .find(|(prefix, _)| consumer.starts_with(prefix.as_str()))
                .map(|(_, remaining)| remaining)
            {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(ProvisionError::Backend(format!(
                        "mock failure for {consumer}"
                    )));
                }
            }
        }

        let inserted = self
            .consumers
            .lock()
            .unwrap()
            .insert((room_id.to_string(), consumer.to_string()));
        if inserted {
            self.creations.fetch_add(1, Ordering::SeqCst);
            Ok(ConsumerStatus::Created)
        } else {
            Ok(ConsumerStatus::Existing)
        }
    }
}

// ============================================================================
// Repositories
// ============================================================================

/// In-memory room table.
#[derive(Default)]
pub struct MockRoomRepository {
    rooms: Mutex<HashMap<i64, RoomRecord>>,
    status_patches: Mutex<Vec<RoomStatusPatch>>,
    recording_patches: Mutex<Vec<RecordingStatusPatch>>,
    rtmp_patches: Mutex<Vec<RtmpStatusPatch>>,
    fail_writes: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MockRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn put_room(&self, room: RoomRecord) {
        self.rooms.lock().unwrap().insert(room.id, room);
    }

    pub fn room(&self, id: i64) -> Option<RoomRecord> {
        self.rooms.lock().unwrap().get(&id).cloned()
    }

    pub fn status_patches(&self) -> Vec<RoomStatusPatch> {
        self.status_patches.lock().unwrap().clone()
    }

    pub fn recording_patches(&self) -> Vec<RecordingStatusPatch> {
        self.recording_patches.lock().unwrap().clone()
    }

    pub fn rtmp_patches(&self) -> Vec<RtmpStatusPatch> {
        self.rtmp_patches.lock().unwrap().clone()
    }

    fn check_writes(&self) -> Result<(), RcError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RcError::Database("mock write failure".to_string()));
        }
        Ok(())
    }

    fn update_where<F, U>(&self, matches: F, mut update: U) -> u64
    where
        F: Fn(&RoomRecord) -> bool,
        U: FnMut(&mut RoomRecord),
    {
        let mut rooms = self.rooms.lock().unwrap();
        let mut affected = 0;
        for room in rooms.values_mut().filter(|r| matches(r)) {
            update(room);
            affected += 1;
        }
        affected
    }
}

/// A stopped room row with the given ids, for seeding.
pub fn test_room_record(id: i64, room_id: &str, sid: &str) -> RoomRecord {
    RoomRecord {
        id,
        room_id: room_id.to_string(),
        room_title: format!("{room_id} title"),
        sid: sid.to_string(),
        is_running: false,
        is_recording: false,
        is_active_rtmp: false,
        recorder_id: String::new(),
        rtmp_node_id: String::new(),
        joined_participants: 0,
        ended: None,
        creation_time: 1_700_000_000,
    }
}

#[async_trait::async_trait]
impl RoomRepository for MockRoomRepository {
    async fn update_room_status(&self, patch: &RoomStatusPatch) -> Result<u64, RcError> {
        self.check_writes()?;
        self.status_patches.lock().unwrap().push(patch.clone());

        let selector = patch.selector().clone();
        let target = patch.is_running();
        let ended = patch.ended().and_then(|e| {
            chrono::NaiveDateTime::parse_from_str(&e, rc_service::repositories::ENDED_TIMESTAMP_FORMAT)
                .ok()
        });

        Ok(self.update_where(
            |r| {
                let selected = match &selector {
                    RoomSelector::TableId(id) => r.id == *id,
                    RoomSelector::RoomId(room_id) => &r.room_id == room_id,
                    RoomSelector::Sid(sid) => &r.sid == sid,
                };
                selected && r.is_running != target
            },
            |r| {
                r.is_running = target;
                if !target {
                    r.is_recording = false;
                    r.is_active_rtmp = false;
                    r.ended = ended;
                }
            },
        ))
    }

    async fn update_recording_status(&self, patch: &RecordingStatusPatch) -> Result<u64, RcError> {
        self.check_writes()?;
        self.recording_patches.lock().unwrap().push(patch.clone());
        Ok(self.update_where(
            |r| r.id == patch.table_id,
            |r| {
                r.is_recording = patch.is_recording;
                if let Some(recorder_id) = &patch.recorder_id {
                    r.recorder_id = recorder_id.clone();
                }
            },
        ))
    }

    async fn update_rtmp_status(&self, patch: &RtmpStatusPatch) -> Result<u64, RcError> {
        self.check_writes()?;
        self.rtmp_patches.lock().unwrap().push(patch.clone());
        Ok(self.update_where(
            |r| r.id == patch.table_id,
            |r| {
                r.is_active_rtmp = patch.is_active_rtmp;
                if let Some(node) = &patch.rtmp_node_id {
                    r.rtmp_node_id = node.clone();
                }
            },
        ))
    }

    async fn set_joined_participants(&self, sid: &str, count: i64) -> Result<u64, RcError> {
        self.check_writes()?;
        Ok(self.update_where(|r| r.sid == sid, |r| r.joined_participants = count.max(0)))
    }

    async fn adjust_joined_participants(&self, sid: &str, delta: i64) -> Result<u64, RcError> {
        self.check_writes()?;
        Ok(self.update_where(
            |r| r.sid == sid,
            |r| r.joined_participants = (r.joined_participants + delta).max(0),
        ))
    }

    async fn insert_room(&self, room: &NewRoom) -> Result<i64, RcError> {
        self.check_writes()?;
        let mut rooms = self.rooms.lock().unwrap();
        let id = rooms.keys().max().copied().unwrap_or(0) + 1;
        let mut record = test_room_record(id, &room.room_id, &room.sid);
        record.room_title = room.room_title.clone();
        record.is_running = room.is_running;
        rooms.insert(id, record);
        Ok(id)
    }

    async fn get_room_by_table_id(&self, table_id: i64) -> Result<Option<RoomRecord>, RcError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(RcError::Database("mock lookup failure".to_string()));
        }
        Ok(self.room(table_id))
    }
}

/// Recording table that hands out a fixed creation time.
pub struct MockRecordingRepository {
    creation_time: i64,
    fail: AtomicBool,
    inserted: Mutex<Vec<NewRecording>>,
}

impl MockRecordingRepository {
    pub fn new(creation_time: i64) -> Self {
        Self {
            creation_time,
            fail: AtomicBool::new(false),
            inserted: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_inserts(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn inserted(&self) -> Vec<NewRecording> {
        self.inserted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RecordingRepository for MockRecordingRepository {
    async fn insert_recording(&self, recording: &NewRecording) -> Result<i64, RcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RcError::Database("mock insert failure".to_string()));
        }
        self.inserted.lock().unwrap().push(recording.clone());
        Ok(self.creation_time)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Records every publish attempt, including failed ones.
#[derive(Default)]
pub struct MockNotificationPublisher {
    attempts: Mutex<Vec<(String, RoomEvent)>>,
    fail: AtomicBool,
}

impl MockNotificationPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<(String, RoomEvent)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn metadata_updates(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter_map(|(_, event)| match event {
                RoomEvent::RoomMetadataUpdate { metadata } => Some(metadata),
                RoomEvent::InfoNotification { .. } => None,
            })
            .collect()
    }

    pub fn info_messages(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter_map(|(_, event)| match event {
                RoomEvent::InfoNotification { msg, .. } => Some(msg),
                RoomEvent::RoomMetadataUpdate { .. } => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationPublisher for MockNotificationPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let event: RoomEvent = serde_json::from_slice(&payload).expect("room event payload");
        self.attempts
            .lock()
            .unwrap()
            .push((subject.to_string(), event));
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Transport("mock publish failure".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Access tokens
// ============================================================================

/// Verifier with a fixed token table.
#[derive(Default)]
pub struct MockAccessTokenVerifier {
    tokens: Mutex<HashMap<String, VerifiedAccess>>,
    hang: AtomicBool,
    calls: AtomicUsize,
}

impl MockAccessTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as issued for `room_id`/`user_id`.
    pub fn accepting(self, token: &str, room_id: &str, user_id: &str) -> Self {
        self.tokens.lock().unwrap().insert(
            token.to_string(),
            VerifiedAccess {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
                name: None,
                is_admin: false,
            },
        );
        self
    }

    /// Never answer; only cancellation ends the call.
    pub fn hanging(self) -> Self {
        self.hang.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AccessTokenVerifier for MockAccessTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedAccess, AccessTokenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or(AccessTokenError::Invalid)
    }
}
