//! Transcript delivery.
//!
//! The chat platform that receives finished transcripts sits behind
//! [`DeliverySink`]. The coordinator enforces the upload size ceiling:
//! when the combined artifacts are too large to attach, the sink gets a
//! notice pointing at the on-disk files instead.

use crate::error::Result;
use crate::session::types::Session;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Outlet for finished transcripts.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Uploads the transcript files to the session's text channel.
    async fn deliver_files(&self, session: &Session, files: &[PathBuf]) -> Result<()>;

    /// Posts a text-only notice to the session's text channel.
    async fn deliver_notice(&self, session: &Session, message: &str) -> Result<()>;
}

/// Applies the upload ceiling in front of a sink.
pub struct TranscriptDelivery {
    sink: Box<dyn DeliverySink>,
    max_upload_bytes: u64,
}

impl TranscriptDelivery {
    pub fn new(sink: Box<dyn DeliverySink>, max_upload_bytes: u64) -> Self {
        Self {
            sink,
            max_upload_bytes,
        }
    }

    /// Delivers the transcript files, or a notice with their paths when the
    /// combined size exceeds the upload ceiling.
    pub async fn deliver(&self, session: &Session, files: &[PathBuf]) -> Result<()> {
        let mut total = 0u64;
        for file in files {
            let metadata = tokio::fs::metadata(file).await?;
            total += metadata.len();
        }

        if total > self.max_upload_bytes {
            info!(
                session_id = %session.session_id,
                total_bytes = total,
                "transcripts exceed the upload ceiling, sending paths instead"
            );
            let listing = files
                .iter()
                .map(|f| f.display().to_string())
                .collect::<Vec<_>>()
                .join("\n");
            let message = format!(
                "Transcripts are too large to upload ({total} bytes). \
                 They are saved on the recording host:\n{listing}"
            );
            return self.sink.deliver_notice(session, &message).await;
        }

        self.sink.deliver_files(session, files).await
    }
}

/// Sink for deployments without a chat surface: leaves the files on disk
/// and logs where they are.
pub struct LogDeliverySink;

#[async_trait]
impl DeliverySink for LogDeliverySink {
    async fn deliver_files(&self, session: &Session, files: &[PathBuf]) -> Result<()> {
        for file in files {
            info!(
                session_id = %session.session_id,
                path = %file.display(),
                "transcript ready"
            );
        }
        Ok(())
    }

    async fn deliver_notice(&self, session: &Session, message: &str) -> Result<()> {
        info!(session_id = %session.session_id, "{message}");
        Ok(())
    }
}

/// Test double recording what was delivered.
#[derive(Default)]
pub struct MockDeliverySink {
    pub deliveries: std::sync::Mutex<Vec<Vec<PathBuf>>>,
    pub notices: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl DeliverySink for MockDeliverySink {
    async fn deliver_files(&self, _session: &Session, files: &[PathBuf]) -> Result<()> {
        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.push(files.to_vec());
        }
        Ok(())
    }

    async fn deliver_notice(&self, _session: &Session, message: &str) -> Result<()> {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(message.to_string());
        }
        Ok(())
    }
}
