//! Per-category durable consumers.
//!
//! Each feature category gets one durable consumer per participant on the
//! room's stream, named `{prefix}_{userId}`. Creation is get-or-create:
//! concurrent duplicate calls (reconnect races) converge on one consumer.
//!
//! # Key Patterns
//!
//! - `room-stream:{roomId}` - the room's stream; one consumer group per
//!   consumer name

use super::{ConsumerProvisioner, FeatureCategory, ProvisionError};
use crate::observability::metrics::record_consumer_provisioning;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Outcome of a get-or-create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    Created,
    Existing,
}

impl ConsumerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumerStatus::Created => "created",
            ConsumerStatus::Existing => "existing",
        }
    }
}

/// Storage that holds durable consumers.
#[async_trait::async_trait]
pub trait ConsumerBackend: Send + Sync {
    /// Ensure `consumer` exists on the stream of `room_id`.
    async fn ensure_consumer(
        &self,
        room_id: &str,
        consumer: &str,
    ) -> Result<ConsumerStatus, ProvisionError>;
}

/// Provisioner for one category backed by a [`ConsumerBackend`].
pub struct StreamConsumerProvisioner {
    category: FeatureCategory,
    prefix: String,
    backend: Arc<dyn ConsumerBackend>,
}

impl StreamConsumerProvisioner {
    pub fn new(category: FeatureCategory, prefix: String, backend: Arc<dyn ConsumerBackend>) -> Self {
        Self {
            category,
            prefix,
            backend,
        }
    }

    pub fn consumer_name(&self, user_id: &str) -> String {
        format!("{}_{user_id}", self.prefix)
    }

    fn grants(&self, room_id: &str, user_id: &str, consumer: &str) -> Vec<String> {
        let mut allow = vec![
            format!("$JS.API.CONSUMER.INFO.{room_id}.{consumer}"),
            format!("$JS.API.CONSUMER.MSG.NEXT.{room_id}.{consumer}"),
            format!("$JS.ACK.{room_id}.{consumer}.>"),
        ];
        if self.category.grants_publish() {
            allow.push(format!("{}.{room_id}.{user_id}", self.prefix));
        }
        allow
    }
}

#[async_trait::async_trait]
impl ConsumerProvisioner for StreamConsumerProvisioner {
    #[instrument(skip_all, fields(room_id = %room_id, category = %self.category))]
    async fn provision(&self, room_id: &str, user_id: &str) -> Result<Vec<String>, ProvisionError> {
        let consumer = self.consumer_name(user_id);

        match self.backend.ensure_consumer(room_id, &consumer).await {
            Ok(status) => {
                record_consumer_provisioning(self.category.as_str(), status.as_str());
                debug!(
                    target: "rc.capabilities",
                    room_id = %room_id,
                    category = %self.category,
                    status = status.as_str(),
                    "Consumer ready"
                );
                Ok(self.grants(room_id, user_id, &consumer))
            }
            Err(e) => {
                record_consumer_provisioning(self.category.as_str(), "error");
                Err(e)
            }
        }
    }
}

/// Consumers as Redis stream consumer groups.
///
/// `XGROUP CREATE … MKSTREAM` creates the stream and the group in one step;
/// a `BUSYGROUP` reply means the group already exists.
#[derive(Clone)]
pub struct RedisConsumerBackend {
    connection: MultiplexedConnection,
}

impl RedisConsumerBackend {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

pub fn room_stream_key(room_id: &str) -> String {
    format!("room-stream:{room_id}")
}

#[async_trait::async_trait]
impl ConsumerBackend for RedisConsumerBackend {
    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn ensure_consumer(
        &self,
        room_id: &str,
        consumer: &str,
    ) -> Result<ConsumerStatus, ProvisionError> {
        let mut conn = self.connection.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(room_stream_key(room_id), consumer, "$")
            .await;

        match created {
            Ok(()) => Ok(ConsumerStatus::Created),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(ConsumerStatus::Existing),
            Err(e) => {
                warn!(
                    target: "rc.capabilities",
                    error = %e,
                    room_id = %room_id,
                    "Failed to create consumer group"
                );
                Err(ProvisionError::Backend(format!(
                    "Failed to create consumer group: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConsumerBackend for CountingBackend {
        async fn ensure_consumer(
            &self,
            _room_id: &str,
            _consumer: &str,
        ) -> Result<ConsumerStatus, ProvisionError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ConsumerStatus::Created)
            } else {
                Ok(ConsumerStatus::Existing)
            }
        }
    }

    fn provisioner(category: FeatureCategory, prefix: &str) -> StreamConsumerProvisioner {
        StreamConsumerProvisioner::new(
            category,
            prefix.to_string(),
            Arc::new(CountingBackend {
                calls: AtomicUsize::new(0),
            }),
        )
    }

    #[tokio::test]
    async fn test_chat_grants_include_publish() {
        let chat = provisioner(FeatureCategory::Chat, "chat");

        let allow = chat.provision("room1", "user42").await.unwrap();

        assert_eq!(
            allow,
            vec![
                "$JS.API.CONSUMER.INFO.room1.chat_user42",
                "$JS.API.CONSUMER.MSG.NEXT.room1.chat_user42",
                "$JS.ACK.room1.chat_user42.>",
                "chat.room1.user42",
            ]
        );
    }

    #[tokio::test]
    async fn test_system_private_grants_are_consume_only() {
        let private = provisioner(FeatureCategory::SystemPrivate, "sysPrivate");

        let allow = private.provision("room1", "user42").await.unwrap();

        assert_eq!(allow.len(), 3);
        assert!(allow.iter().all(|s| s.contains("sysPrivate_user42")));
    }

    #[tokio::test]
    async fn test_existing_consumer_grants_same_subjects() {
        let chat = provisioner(FeatureCategory::Chat, "chat");

        let first = chat.provision("room1", "user42").await.unwrap();
        let second = chat.provision("room1", "user42").await.unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_stream_key() {
        assert_eq!(room_stream_key("room1"), "room-stream:room1");
    }
}
