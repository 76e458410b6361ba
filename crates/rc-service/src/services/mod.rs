//! Room Controller services.

pub mod callout;
pub mod notifications;
pub mod recording_audit;
pub mod state_sync;

pub use callout::AuthCalloutService;
pub use notifications::{
    NotificationBroadcaster, NotificationPublisher, PublishError, RedisNotificationPublisher,
    RoomEvent,
};
pub use recording_audit::{AuditError, RecordingAuditRecord, RecordingAuditWriter};
pub use state_sync::{RecorderEvent, RecorderTask, StateSyncBridge, SyncError};
