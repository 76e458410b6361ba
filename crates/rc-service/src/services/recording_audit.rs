//! Recording audit files.
//!
//! Every recording output gets a JSON sidecar next to it,
//! `{recording_files_path}/{file_path}.json`, mirroring the relational
//! recording row plus room context. If the relational record is ever lost,
//! operators rebuild it from these files.
//!
//! Files are write-once: an existing sidecar is never replaced. The body is
//! staged in a temporary file in the same directory and only linked into
//! place once fully written, so a failed write leaves nothing behind.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use std::io::Write;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum AuditError {
    /// The recording file path is absolute or escapes the recordings root.
    #[error("recording file path {0:?} is not a relative path inside the recordings root")]
    UnsafePath(String),

    #[error("failed to serialize audit record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write audit file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Contents of one audit file. Every field is always written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingAuditRecord {
    pub room_table_id: i64,
    pub room_id: String,
    pub room_title: String,
    pub room_sid: String,
    /// Unix seconds.
    pub room_creation_time: i64,
    /// Unix milliseconds; 0 while the room is still running.
    pub room_ended: i64,
    pub recording_id: String,
    pub recorder_id: String,
    pub file_path: String,
    pub file_size: i64,
    /// Creation time returned by the relational insert, unix seconds.
    pub creation_time: i64,
}

#[derive(Debug, Clone)]
pub struct RecordingAuditWriter {
    root: PathBuf,
}

impl RecordingAuditWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where the audit file for `file_path` lives.
    ///
    /// # Errors
    ///
    /// `AuditError::UnsafePath` for empty or absolute paths and paths with
    /// `..` components.
    pub fn audit_path(&self, file_path: &str) -> Result<PathBuf, AuditError> {
        let relative = Path::new(file_path);
        let safe = !file_path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(AuditError::UnsafePath(file_path.to_string()));
        }
        Ok(self.root.join(format!("{file_path}.json")))
    }

    /// Write the audit file for `record`, failing if one already exists.
    ///
    /// # Errors
    ///
    /// Unsafe path, serialization or filesystem failure (including an
    /// existing file).
    #[instrument(skip_all, fields(room_id = %record.room_id, sid = %record.room_sid))]
    pub async fn write(&self, record: &RecordingAuditRecord) -> Result<PathBuf, AuditError> {
        let path = self.audit_path(&record.file_path)?;
        let body = serde_json::to_vec(record).map_err(AuditError::Encode)?;

        let io_err = |source: std::io::Error| AuditError::Io {
            path: path.clone(),
            source,
        };

        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            publish_new(&target, |file| {
                file.write_all(&body)?;
                file.flush()
            })
        })
        .await
        .map_err(|e| io_err(std::io::Error::other(e)))?
        .map_err(io_err)?;

        info!(target: "rc.audit", path = %path.display(), "Recording audit file written");
        Ok(path)
    }
}

/// Create `path` with the contents produced by `fill`, failing if it exists.
fn publish_new(
    path: &Path,
    fill: impl FnOnce(&mut std::fs::File) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    fill(staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;
    }
    staged.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(file_path: &str) -> RecordingAuditRecord {
        RecordingAuditRecord {
            room_table_id: 7,
            room_id: "room1".to_string(),
            room_title: "Weekly".to_string(),
            room_sid: "sidABC".to_string(),
            room_creation_time: 1_700_000_000,
            room_ended: 0,
            recording_id: "rec-1".to_string(),
            recorder_id: "recorder-a".to_string(),
            file_path: file_path.to_string(),
            file_size: 1024,
            creation_time: 1_700_000_100,
        }
    }

    #[test]
    fn test_audit_path_appends_json() {
        let writer = RecordingAuditWriter::new("/data/rec");
        assert_eq!(
            writer.audit_path("room1/rec-1.mp4").unwrap(),
            PathBuf::from("/data/rec/room1/rec-1.mp4.json")
        );
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        let writer = RecordingAuditWriter::new("/data/rec");
        for path in ["", "../etc/passwd", "room1/../../x.mp4", "/abs/rec.mp4"] {
            assert!(
                matches!(writer.audit_path(path), Err(AuditError::UnsafePath(_))),
                "{path} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_write_emits_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordingAuditWriter::new(dir.path());

        let path = writer.write(&record("rec-1.mp4")).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["creation_time"], 1_700_000_100);
        assert_eq!(json["room_ended"], 0);
        assert_eq!(json.as_object().unwrap().len(), 11);
    }

    #[tokio::test]
    async fn test_existing_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordingAuditWriter::new(dir.path());
        writer.write(&record("rec-1.mp4")).await.unwrap();

        let mut second = record("rec-1.mp4");
        second.creation_time = 1;
        let err = writer.write(&second).await.unwrap_err();
        assert!(matches!(err, AuditError::Io { .. }));

        let stored: RecordingAuditRecord = serde_json::from_slice(
            &std::fs::read(dir.path().join("rec-1.mp4.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(stored.creation_time, 1_700_000_100);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordingAuditWriter::new(dir.path());
        let path = writer.audit_path("rec-1.mp4").unwrap();

        let err = publish_new(&path, |file| {
            file.write_all(b"{\"room_id\":")?;
            Err(std::io::Error::other("disk full"))
        })
        .unwrap_err();

        assert_eq!(err.to_string(), "disk full");
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // A later attempt for the same recording still succeeds.
        writer.write(&record("rec-1.mp4")).await.unwrap();
        let stored: RecordingAuditRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, record("rec-1.mp4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_file_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let writer = RecordingAuditWriter::new(dir.path());

        let path = writer.write(&record("rec-1.mp4")).await.unwrap();

        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
