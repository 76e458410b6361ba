//! Per-room key-value namespaces.
//!
//! A bucket groups the fields of one room (or one participant). Existence of
//! the bucket is meaningful on its own: no bucket means no room.

mod redis_store;

pub use redis_store::RedisKvStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("key-value backend error: {0}")]
    Backend(String),
}

/// Bucketed key-value storage.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Whether the bucket exists at all.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, KvError>;

    /// Read one field. `Ok(None)` when the field is absent.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<String>, KvError>;

    /// Write one field, creating the bucket if needed.
    async fn put(&self, bucket: &str, key: &str, value: &str) -> Result<(), KvError>;

    /// Write several fields, creating the bucket if needed.
    async fn put_all(&self, bucket: &str, entries: &[(&str, String)]) -> Result<(), KvError> {
        for (key, value) in entries {
            self.put(bucket, key, value).await?;
        }
        Ok(())
    }
}
