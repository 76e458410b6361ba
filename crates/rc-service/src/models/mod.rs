//! Room state types shared by the callout and the sync bridge.

mod metadata;

use serde::{Deserialize, Serialize};

pub use metadata::{marshal_room_metadata, unmarshal_room_metadata, MetadataError, RoomMetadata};

/// Live view of a room, read from its KV namespace.
///
/// Fields missing from the namespace stay at their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomInfo {
    /// Primary key of the room's relational record.
    pub db_table_id: u64,
    pub room_id: String,
    pub room_sid: String,
    pub status: String,
    /// Seconds an empty room is kept before teardown.
    pub empty_timeout: u64,
    /// Serialized [`RoomMetadata`].
    pub metadata: String,
    /// Unix seconds.
    pub created_at: u64,
}

/// Live view of one participant, read from its KV namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub room_id: String,
    pub name: String,
    pub is_admin: bool,
    pub metadata: String,
    /// Unix seconds.
    pub joined_at: u64,
}

/// Health check response, returned by `/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy".
    pub status: String,

    /// Database connectivity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}
