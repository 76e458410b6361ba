//! Redis-backed bucket store.
//!
//! # Key Patterns
//!
//! - `kv:{bucket}` - one HASH per bucket, one hash field per key
//!
//! The `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently; every call clones it.

use super::{KvError, KvStore};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct RedisKvStore {
    connection: MultiplexedConnection,
}

fn bucket_key(bucket: &str) -> String {
    format!("kv:{bucket}")
}

impl RedisKvStore {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    /// Open a client and a multiplexed connection.
    ///
    /// # Errors
    ///
    /// Returns `KvError::Backend` if the URL is invalid or the connection
    /// fails. The URL is never logged.
    pub async fn connect(redis_url: &str) -> Result<Self, KvError> {
        let client = Client::open(redis_url).map_err(|e| {
            warn!(target: "rc.kv", error = %e, "Failed to open Redis client");
            KvError::Backend(format!("Failed to open Redis client: {e}"))
        })?;
        let connection = client.get_multiplexed_async_connection().await.map_err(|e| {
            warn!(target: "rc.kv", error = %e, "Failed to connect to Redis");
            KvError::Backend(format!("Failed to connect to Redis: {e}"))
        })?;
        Ok(Self::new(connection))
    }

    /// Handle to the underlying connection, for sharing with other Redis
    /// users.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

#[async_trait::async_trait]
impl KvStore for RedisKvStore {
    #[instrument(skip_all, fields(bucket = %bucket))]
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, KvError> {
        let mut conn = self.connection.clone();
        conn.exists(bucket_key(bucket)).await.map_err(|e| {
            warn!(target: "rc.kv", error = %e, bucket = %bucket, "Failed to check bucket");
            KvError::Backend(format!("Failed to check bucket: {e}"))
        })
    }

    #[instrument(skip_all, fields(bucket = %bucket, key = %key))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.connection.clone();
        conn.hget(bucket_key(bucket), key).await.map_err(|e| {
            warn!(target: "rc.kv", error = %e, bucket = %bucket, key = %key, "Failed to read field");
            KvError::Backend(format!("Failed to read field: {e}"))
        })
    }

    #[instrument(skip_all, fields(bucket = %bucket, key = %key))]
    async fn put(&self, bucket: &str, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.connection.clone();
        conn.hset::<_, _, _, ()>(bucket_key(bucket), key, value)
            .await
            .map_err(|e| {
                warn!(target: "rc.kv", error = %e, bucket = %bucket, key = %key, "Failed to write field");
                KvError::Backend(format!("Failed to write field: {e}"))
            })
    }

    #[instrument(skip_all, fields(bucket = %bucket, fields = entries.len()))]
    async fn put_all(&self, bucket: &str, entries: &[(&str, String)]) -> Result<(), KvError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.hset_multiple::<_, _, _, ()>(bucket_key(bucket), entries)
            .await
            .map_err(|e| {
                warn!(target: "rc.kv", error = %e, bucket = %bucket, "Failed to write fields");
                KvError::Backend(format!("Failed to write fields: {e}"))
            })
    }
}
