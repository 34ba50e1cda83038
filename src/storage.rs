//! Session directory layout and lifecycle.
//!
//! One tree per concern: `sessions/<id>` for metadata, `segments/<id>` for
//! per-speaker WAV files, `transcripts/<id>` for rendered output. Deletion
//! and the retention sweep are best-effort; failures are logged and skipped.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{error, info};

/// Resolves and manages per-session storage paths.
#[derive(Debug, Clone)]
pub struct StorageManager {
    data_dir: PathBuf,
}

impl StorageManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Creates the root directory trees.
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.sessions_root()).await?;
        tokio::fs::create_dir_all(self.data_dir.join("segments")).await?;
        tokio::fs::create_dir_all(self.data_dir.join("transcripts")).await?;
        Ok(())
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir.join("sessions").join(session_id)
    }

    pub fn segment_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir.join("segments").join(session_id)
    }

    pub fn transcript_dir(&self, session_id: &str) -> PathBuf {
        self.data_dir.join("transcripts").join(session_id)
    }

    /// Creates all three directories for a session.
    pub async fn create_session_dirs(&self, session_id: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.session_dir(session_id)).await?;
        tokio::fs::create_dir_all(self.segment_dir(session_id)).await?;
        tokio::fs::create_dir_all(self.transcript_dir(session_id)).await?;
        Ok(())
    }

    /// Removes every stored artifact for a session.
    pub async fn delete_session(&self, session_id: &str) {
        for dir in [
            self.session_dir(session_id),
            self.segment_dir(session_id),
            self.transcript_dir(session_id),
        ] {
            remove_dir_best_effort(&dir).await;
        }
    }

    /// Deletes session trees whose metadata directory is older than the
    /// retention window (mtime-based).
    pub async fn cleanup_old_sessions(&self, retention_days: u32) {
        let retention = Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = match tokio::fs::read_dir(self.sessions_root()).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("retention sweep failed to read sessions root: {e}");
                return;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let session_id = entry.file_name().to_string_lossy().to_string();
            let modified = entry.metadata().await.and_then(|m| m.modified());
            match modified {
                Ok(mtime) if mtime < cutoff => {
                    info!(session_id = %session_id, "cleaning up expired session");
                    self.delete_session(&session_id).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(session_id = %session_id, "retention sweep could not stat session: {e}")
                }
            }
        }
    }
}

async fn remove_dir_best_effort(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        error!("failed to delete {}: {e}", dir.display());
    }
}
