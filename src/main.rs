//! Headless pipeline runner.
//!
//! Loads durable session state, finishes any session that was interrupted
//! mid-stop or mid-transcription, then sweeps expired session data. Run it
//! at service start, before the platform front-end attaches.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tablescribe::delivery::{LogDeliverySink, TranscriptDelivery};
use tablescribe::session::manager::SessionManager;
use tablescribe::session::persistence::SessionPersistence;
use tablescribe::session::processor::SessionProcessor;
use tablescribe::storage::StorageManager;
use tablescribe::transcribe::queue::TranscriptionQueue;
use tablescribe::transcribe::service::OpenAiTranscriber;
use tablescribe::Config;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(Config::default_path);
    let config = match &config_path {
        Some(path) => Config::load_or_default(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    }
    .with_env_overrides();

    let storage = StorageManager::new(config.storage.data_dir.clone());
    storage.initialize().await.context("preparing data directory")?;

    let persistence = SessionPersistence::new(storage.clone());
    let restored = persistence.load_all().await.context("loading session state")?;
    let manager = Arc::new(SessionManager::new(persistence));
    let resumable = manager.restore(restored);

    if resumable.is_empty() {
        info!("no interrupted sessions to resume");
    } else {
        let transcriber = OpenAiTranscriber::new(&config.transcription)?;
        let queue = Arc::new(TranscriptionQueue::new(
            Arc::new(transcriber),
            &config.transcription,
        ));
        let delivery = config.delivery.enabled.then(|| {
            TranscriptDelivery::new(Box::new(LogDeliverySink), config.delivery.max_upload_bytes)
        });
        let processor = SessionProcessor::new(manager.clone(), storage.clone(), queue, delivery);

        for session_id in resumable {
            match processor.process_session(&session_id).await {
                Ok(files) => info!(
                    session_id = %session_id,
                    transcripts = files.len(),
                    "resumed session finished"
                ),
                Err(e) => error!(session_id = %session_id, "failed to resume session: {e}"),
            }
        }
    }

    storage
        .cleanup_old_sessions(config.storage.retention_days)
        .await;

    Ok(())
}
