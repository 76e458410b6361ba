//! Room state store over per-room KV namespaces.
//!
//! # Bucket Patterns
//!
//! - `room-info:{roomId}` - room fields (table id, sid, status, metadata, ...)
//! - `room-user:{roomId}:{userId}` - participant fields
//!
//! Identifiers are escaped (`%` and `:`) before they are joined, so no pair
//! of identifiers can name another's bucket.
//!
//! A missing bucket means the room (or participant) does not exist and is
//! reported as `Ok(None)`. Inside an existing bucket every field is read on
//! its own; a field that is absent or unreadable is left at its zero value,
//! because writers populate fields in separate operations. Reads are not
//! atomic across fields.

use crate::kv::{KvError, KvStore};
use crate::models::{
    marshal_room_metadata, unmarshal_room_metadata, MetadataError, RoomInfo, RoomMetadata,
    UserInfo,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

pub mod room_keys {
    pub const DB_TABLE_ID: &str = "db_table_id";
    pub const ROOM_ID: &str = "room_id";
    pub const ROOM_SID: &str = "room_sid";
    pub const STATUS: &str = "status";
    pub const EMPTY_TIMEOUT: &str = "empty_timeout";
    pub const METADATA: &str = "metadata";
    pub const CREATED_AT: &str = "created_at";
}

pub mod user_keys {
    pub const USER_ID: &str = "id";
    pub const ROOM_ID: &str = "room_id";
    pub const NAME: &str = "name";
    pub const IS_ADMIN: &str = "is_admin";
    pub const METADATA: &str = "metadata";
    pub const JOINED_AT: &str = "joined_at";
}

fn escape_component(id: &str) -> String {
    id.replace('%', "%25").replace(':', "%3A")
}

pub fn room_info_bucket(room_id: &str) -> String {
    format!("room-info:{}", escape_component(room_id))
}

pub fn user_info_bucket(room_id: &str, user_id: &str) -> String {
    format!(
        "room-user:{}:{}",
        escape_component(room_id),
        escape_component(user_id)
    )
}

#[derive(Debug, Error)]
pub enum RoomStateError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Room info together with its parsed metadata.
///
/// `metadata` is `None` when the field is absent or empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub info: RoomInfo,
    pub metadata: Option<RoomMetadata>,
}

#[derive(Clone)]
pub struct RoomStateStore {
    kv: Arc<dyn KvStore>,
}

impl RoomStateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Read every field of a room's namespace.
    ///
    /// # Errors
    ///
    /// Only a failure to resolve the namespace itself is an error.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_room_info(&self, room_id: &str) -> Result<Option<RoomInfo>, RoomStateError> {
        let bucket = room_info_bucket(room_id);
        if !self.kv.bucket_exists(&bucket).await? {
            return Ok(None);
        }

        Ok(Some(RoomInfo {
            db_table_id: parse_u64(self.read_field(&bucket, room_keys::DB_TABLE_ID).await),
            room_id: self
                .read_field(&bucket, room_keys::ROOM_ID)
                .await
                .unwrap_or_default(),
            room_sid: self
                .read_field(&bucket, room_keys::ROOM_SID)
                .await
                .unwrap_or_default(),
            status: self
                .read_field(&bucket, room_keys::STATUS)
                .await
                .unwrap_or_default(),
            empty_timeout: parse_u64(self.read_field(&bucket, room_keys::EMPTY_TIMEOUT).await),
            metadata: self
                .read_field(&bucket, room_keys::METADATA)
                .await
                .unwrap_or_default(),
            created_at: parse_u64(self.read_field(&bucket, room_keys::CREATED_AT).await),
        }))
    }

    /// Room info plus parsed metadata.
    ///
    /// # Errors
    ///
    /// `RoomStateError::Metadata` when the metadata field is present but does
    /// not parse; this is distinct from the field being absent.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_room_info_with_metadata(
        &self,
        room_id: &str,
    ) -> Result<Option<RoomSnapshot>, RoomStateError> {
        let Some(info) = self.get_room_info(room_id).await? else {
            return Ok(None);
        };

        let metadata = if info.metadata.is_empty() {
            None
        } else {
            Some(unmarshal_room_metadata(&info.metadata)?)
        };

        Ok(Some(RoomSnapshot { info, metadata }))
    }

    /// Only the metadata field, parsed.
    ///
    /// # Errors
    ///
    /// Backend failures reading the namespace or the field, and metadata
    /// that does not parse.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_room_metadata(
        &self,
        room_id: &str,
    ) -> Result<Option<RoomMetadata>, RoomStateError> {
        let Some(raw) = self.get_room_field(room_id, room_keys::METADATA).await? else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(unmarshal_room_metadata(&raw)?))
    }

    /// Only the status field.
    ///
    /// # Errors
    ///
    /// Backend failures reading the namespace or the field.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_room_status(&self, room_id: &str) -> Result<Option<String>, RoomStateError> {
        self.get_room_field(room_id, room_keys::STATUS).await
    }

    /// Read a participant's namespace.
    ///
    /// # Errors
    ///
    /// Only a failure to resolve the namespace itself is an error.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_user_info(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<UserInfo>, RoomStateError> {
        let bucket = user_info_bucket(room_id, user_id);
        if !self.kv.bucket_exists(&bucket).await? {
            return Ok(None);
        }

        Ok(Some(UserInfo {
            user_id: self
                .read_field(&bucket, user_keys::USER_ID)
                .await
                .unwrap_or_default(),
            room_id: self
                .read_field(&bucket, user_keys::ROOM_ID)
                .await
                .unwrap_or_default(),
            name: self
                .read_field(&bucket, user_keys::NAME)
                .await
                .unwrap_or_default(),
            is_admin: self
                .read_field(&bucket, user_keys::IS_ADMIN)
                .await
                .is_some_and(|v| v == "true" || v == "1"),
            metadata: self
                .read_field(&bucket, user_keys::METADATA)
                .await
                .unwrap_or_default(),
            joined_at: parse_u64(self.read_field(&bucket, user_keys::JOINED_AT).await),
        }))
    }

    /// Write every field of a room's namespace.
    ///
    /// # Errors
    ///
    /// Backend write failures.
    #[instrument(skip_all, fields(room_id = %info.room_id))]
    pub async fn put_room_info(&self, info: &RoomInfo) -> Result<(), RoomStateError> {
        let entries = [
            (room_keys::DB_TABLE_ID, info.db_table_id.to_string()),
            (room_keys::ROOM_ID, info.room_id.clone()),
            (room_keys::ROOM_SID, info.room_sid.clone()),
            (room_keys::STATUS, info.status.clone()),
            (room_keys::EMPTY_TIMEOUT, info.empty_timeout.to_string()),
            (room_keys::METADATA, info.metadata.clone()),
            (room_keys::CREATED_AT, info.created_at.to_string()),
        ];
        self.kv
            .put_all(&room_info_bucket(&info.room_id), &entries)
            .await?;
        Ok(())
    }

    /// Write every field of a participant's namespace.
    ///
    /// # Errors
    ///
    /// Backend write failures.
    #[instrument(skip_all, fields(room_id = %info.room_id))]
    pub async fn put_user_info(&self, info: &UserInfo) -> Result<(), RoomStateError> {
        let entries = [
            (user_keys::USER_ID, info.user_id.clone()),
            (user_keys::ROOM_ID, info.room_id.clone()),
            (user_keys::NAME, info.name.clone()),
            (user_keys::IS_ADMIN, info.is_admin.to_string()),
            (user_keys::METADATA, info.metadata.clone()),
            (user_keys::JOINED_AT, info.joined_at.to_string()),
        ];
        self.kv
            .put_all(&user_info_bucket(&info.room_id, &info.user_id), &entries)
            .await?;
        Ok(())
    }

    /// Serialize and store new metadata, returning the serialized form for
    /// broadcast.
    ///
    /// # Errors
    ///
    /// Serialization or backend write failures.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn update_room_metadata(
        &self,
        room_id: &str,
        metadata: &RoomMetadata,
    ) -> Result<String, RoomStateError> {
        let raw = marshal_room_metadata(metadata)?;
        self.kv
            .put(&room_info_bucket(room_id), room_keys::METADATA, &raw)
            .await?;
        Ok(raw)
    }

    async fn get_room_field(
        &self,
        room_id: &str,
        key: &str,
    ) -> Result<Option<String>, RoomStateError> {
        let bucket = room_info_bucket(room_id);
        if !self.kv.bucket_exists(&bucket).await? {
            return Ok(None);
        }
        Ok(self.kv.get(&bucket, key).await?)
    }

    async fn read_field(&self, bucket: &str, key: &str) -> Option<String> {
        match self.kv.get(bucket, key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(
                    target: "rc.room_state",
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "Field unreadable, leaving at zero value"
                );
                None
            }
        }
    }
}

fn parse_u64(value: Option<String>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}
