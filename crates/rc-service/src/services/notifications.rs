//! Best-effort room notifications.
//!
//! Events are JSON documents published on `{room_events}.{roomId}`. Delivery
//! is fire-and-forget: a failed publish is returned to the caller, which
//! logs it and moves on.

use crate::config::SubjectsConfig;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize room event: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to publish room event: {0}")]
    Transport(String),
}

/// Raw publish primitive.
#[async_trait::async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Publishes over Redis pub/sub.
#[derive(Clone)]
pub struct RedisNotificationPublisher {
    connection: MultiplexedConnection,
}

impl RedisNotificationPublisher {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

#[async_trait::async_trait]
impl NotificationPublisher for RedisNotificationPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let mut conn = self.connection.clone();
        let receivers: i64 = conn
            .publish(subject, payload)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        debug!(target: "rc.notify", subject = %subject, receivers = receivers, "Room event published");
        Ok(())
    }
}

/// Event delivered to everyone in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// The room's metadata changed; carries the serialized document.
    RoomMetadataUpdate { metadata: String },

    /// A localized informational message (the text is a translation key).
    InfoNotification {
        msg: String,
        with_sound: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

/// Room-scoped publisher of [`RoomEvent`]s.
#[derive(Clone)]
pub struct NotificationBroadcaster {
    publisher: Arc<dyn NotificationPublisher>,
    room_events_prefix: String,
}

impl NotificationBroadcaster {
    pub fn new(publisher: Arc<dyn NotificationPublisher>, subjects: &SubjectsConfig) -> Self {
        Self {
            publisher,
            room_events_prefix: subjects.room_events.clone(),
        }
    }

    pub fn room_subject(&self, room_id: &str) -> String {
        format!("{}.{room_id}", self.room_events_prefix)
    }

    /// # Errors
    ///
    /// Serialization or transport failure.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn broadcast_metadata(&self, room_id: &str, metadata: String) -> Result<(), PublishError> {
        self.send(room_id, &RoomEvent::RoomMetadataUpdate { metadata })
            .await
    }

    /// Informational message to the whole room, or to one user when
    /// `user_id` is given.
    ///
    /// # Errors
    ///
    /// Serialization or transport failure.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn notify_info(
        &self,
        room_id: &str,
        msg: &str,
        with_sound: bool,
        user_id: Option<&str>,
    ) -> Result<(), PublishError> {
        self.send(
            room_id,
            &RoomEvent::InfoNotification {
                msg: msg.to_string(),
                with_sound,
                user_id: user_id.map(str::to_string),
            },
        )
        .await
    }

    async fn send(&self, room_id: &str, event: &RoomEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event).map_err(PublishError::Encode)?;
        self.publisher
            .publish(&self.room_subject(room_id), payload)
            .await
    }
}
