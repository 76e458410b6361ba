//! HTTP request handlers for the Room Controller.

pub mod callout;
pub mod health;
pub mod metrics;
pub mod rooms;

pub use callout::auth_callout;
pub use health::health_check;
pub use metrics::metrics_handler;
pub use rooms::{recorder_event, update_participants, update_room_status};

use crate::errors::RcError;
use crate::services::SyncError;

impl From<SyncError> for RcError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::MissingRoomIdentifier => RcError::InvalidRequest(err.to_string()),
            SyncError::Repository(inner) => inner,
        }
    }
}
