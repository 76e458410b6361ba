//! Room metadata document and its JSON codec.
//!
//! Only the fields this service reads or writes are typed; everything else a
//! client stored is carried through untouched in `extra`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("room metadata is not valid JSON: {0}")]
    Unmarshal(#[source] serde_json::Error),

    #[error("room metadata could not be serialized: {0}")]
    Marshal(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomMetadata {
    #[serde(default)]
    pub room_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub is_recording: bool,
    #[serde(default)]
    pub is_active_rtmp: bool,
    /// Unix seconds.
    #[serde(default)]
    pub started_at: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parse the serialized metadata field.
///
/// # Errors
///
/// `MetadataError::Unmarshal` when `raw` is not a JSON object of the
/// expected shape.
pub fn unmarshal_room_metadata(raw: &str) -> Result<RoomMetadata, MetadataError> {
    serde_json::from_str(raw).map_err(MetadataError::Unmarshal)
}

/// Serialize metadata for the KV namespace and for broadcast.
///
/// # Errors
///
/// `MetadataError::Marshal` if serialization fails.
pub fn marshal_room_metadata(metadata: &RoomMetadata) -> Result<String, MetadataError> {
    serde_json::to_string(metadata).map_err(MetadataError::Marshal)
}
