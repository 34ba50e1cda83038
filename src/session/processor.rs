//! Post-recording processing.
//!
//! Once capture ends, a session moves through transcription, timeline
//! assembly, rendering, and delivery. Any failure parks the session in
//! the error state and propagates, so an operator can retry after fixing
//! the cause.

use crate::delivery::TranscriptDelivery;
use crate::error::{Result, ScribeError};
use crate::merge::formatter::{format_json, format_markdown, format_srt};
use crate::merge::timeline::{group_by_speaker, merge_segments};
use crate::session::manager::SessionManager;
use crate::session::types::SessionState;
use crate::storage::StorageManager;
use crate::transcribe::prompt::build_prompt;
use crate::transcribe::queue::{TranscriptionJob, TranscriptionQueue};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub struct SessionProcessor {
    manager: Arc<SessionManager>,
    storage: StorageManager,
    queue: Arc<TranscriptionQueue>,
    delivery: Option<TranscriptDelivery>,
}

impl SessionProcessor {
    pub fn new(
        manager: Arc<SessionManager>,
        storage: StorageManager,
        queue: Arc<TranscriptionQueue>,
        delivery: Option<TranscriptDelivery>,
    ) -> Self {
        Self {
            manager,
            storage,
            queue,
            delivery,
        }
    }

    /// Runs a stopped (or restored) session through to delivery.
    ///
    /// Returns the rendered transcript paths. On failure the session is
    /// left in the error state and the cause is returned.
    pub async fn process_session(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let result = self.run(session_id).await;
        if let Err(e) = &result {
            error!(session_id = %session_id, "session processing failed: {e}");
            let _ = self.manager.update_state(session_id, SessionState::Error);
        }
        result
    }

    async fn run(&self, session_id: &str) -> Result<Vec<PathBuf>> {
        let session = self
            .manager
            .get_session(session_id)
            .ok_or_else(|| ScribeError::session_not_found(session_id))?;
        self.manager
            .update_state(session_id, SessionState::Transcribing)?;

        let segments = self.manager.segments(session_id);
        if segments.is_empty() {
            return Err(ScribeError::Validation {
                message: format!("session {session_id} produced no audio segments"),
            });
        }

        // Segments that already carry text (a resumed session) are not
        // re-sent to the service.
        let prompt = build_prompt(&session.glossary);
        let mut queued = 0usize;
        for segment in segments.iter().filter(|s| s.transcript.is_none()) {
            self.queue.enqueue(TranscriptionJob::new(
                session_id,
                &segment.segment_id,
                segment.audio_path.clone(),
            ));
            queued += 1;
        }

        info!(
            session_id = %session_id,
            total = segments.len(),
            queued,
            "transcribing session segments"
        );
        for result in self.queue.process_queue(&prompt).await {
            self.manager
                .set_transcript(session_id, &result.segment_id, &result.text)?;
        }

        let session = self
            .manager
            .get_session(session_id)
            .ok_or_else(|| ScribeError::session_not_found(session_id))?;
        let segments = self.manager.segments(session_id);
        let timeline = group_by_speaker(merge_segments(&segments, &session.participants));

        let dir = self.storage.transcript_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let files = vec![
            dir.join("transcript.md"),
            dir.join("transcript.json"),
            dir.join("transcript.srt"),
        ];
        tokio::fs::write(&files[0], format_markdown(&session, &timeline)).await?;
        tokio::fs::write(&files[1], format_json(&session, &timeline)?).await?;
        tokio::fs::write(&files[2], format_srt(&timeline)).await?;

        self.manager
            .update_state(session_id, SessionState::Delivering)?;
        if let Some(delivery) = &self.delivery {
            delivery.deliver(&session, &files).await?;
        }

        self.manager.update_state(session_id, SessionState::Idle)?;
        info!(
            session_id = %session_id,
            utterances = timeline.len(),
            "session processed"
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscriptionConfig;
    use crate::delivery::{DeliverySink, MockDeliverySink};
    use crate::session::types::{Segment, Session};
    use crate::transcribe::service::MockTranscriber;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct SharedSink(Arc<MockDeliverySink>);

    #[async_trait]
    impl DeliverySink for SharedSink {
        async fn deliver_files(&self, session: &Session, files: &[PathBuf]) -> Result<()> {
            self.0.deliver_files(session, files).await
        }
        async fn deliver_notice(&self, session: &Session, message: &str) -> Result<()> {
            self.0.deliver_notice(session, message).await
        }
    }

    struct Fixture {
        manager: Arc<SessionManager>,
        session_id: String,
        storage: StorageManager,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let storage = StorageManager::new(dir.path().to_path_buf());
        let manager = Arc::new(SessionManager::in_memory());
        let session = manager.create_session("g1", "vc1", "tc1");
        manager
            .add_participant(&session.session_id, "u1", "Alice", true)
            .unwrap();
        manager
            .add_participant(&session.session_id, "u2", "Bob", true)
            .unwrap();
        Fixture {
            manager,
            session_id: session.session_id,
            storage,
            _dir: dir,
        }
    }

    fn add_segment(f: &Fixture, segment_id: &str, user_id: &str, start_ms: i64, end_ms: i64) {
        f.manager
            .add_segment(
                &f.session_id,
                Segment {
                    segment_id: segment_id.to_string(),
                    session_id: f.session_id.clone(),
                    user_id: user_id.to_string(),
                    start_ms,
                    end_ms,
                    audio_path: PathBuf::from(format!("unused-{segment_id}.wav")),
                    transcript: None,
                },
            )
            .unwrap();
    }

    fn processor(f: &Fixture, mock: Arc<MockTranscriber>) -> SessionProcessor {
        let config = TranscriptionConfig {
            concurrency: 1,
            ..TranscriptionConfig::default()
        };
        SessionProcessor::new(
            f.manager.clone(),
            f.storage.clone(),
            Arc::new(TranscriptionQueue::new(mock, &config)),
            None,
        )
    }

    #[tokio::test]
    async fn processes_a_session_end_to_end() {
        let f = fixture();
        add_segment(&f, "seg1", "u1", 0, 2000);
        add_segment(&f, "seg2", "u2", 5000, 7000);

        let mock = Arc::new(
            MockTranscriber::new()
                .with_response("I open the door.")
                .with_response("Roll for initiative."),
        );
        let files = processor(&f, mock)
            .process_session(&f.session_id)
            .await
            .unwrap();

        assert_eq!(files.len(), 3);
        let md = std::fs::read_to_string(&files[0]).unwrap();
        assert!(md.contains("Alice:** I open the door."));
        assert!(md.contains("Bob:** Roll for initiative."));

        let session = f.manager.get_session(&f.session_id).unwrap();
        assert_eq!(session.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn zero_segments_parks_the_session_in_error() {
        let f = fixture();
        let mock = Arc::new(MockTranscriber::new());

        let result = processor(&f, mock).process_session(&f.session_id).await;
        assert!(matches!(result, Err(ScribeError::Validation { .. })));

        let session = f.manager.get_session(&f.session_id).unwrap();
        assert_eq!(session.state, SessionState::Error);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let f = fixture();
        let mock = Arc::new(MockTranscriber::new());

        let result = processor(&f, mock).process_session("missing").await;
        assert!(matches!(result, Err(ScribeError::NotFound { .. })));
    }

    #[tokio::test]
    async fn failed_segment_is_left_out_of_the_transcript() {
        let f = fixture();
        add_segment(&f, "seg1", "u1", 0, 2000);
        add_segment(&f, "seg2", "u2", 5000, 7000);

        // A permanent failure resolves to empty text, which merging drops.
        let mock = Arc::new(
            MockTranscriber::new()
                .with_failure(ScribeError::Transcription {
                    message: "service returned 400".to_string(),
                    status: Some(400),
                    retry_after_ms: None,
                    rate_limit: false,
                })
                .with_response("Roll for initiative."),
        );
        let files = processor(&f, mock)
            .process_session(&f.session_id)
            .await
            .unwrap();

        let md = std::fs::read_to_string(&files[0]).unwrap();
        assert!(!md.contains("Alice:**"));
        assert!(md.contains("Bob:** Roll for initiative."));
    }

    #[tokio::test]
    async fn resumed_session_skips_transcribed_segments() {
        let f = fixture();
        add_segment(&f, "seg1", "u1", 0, 2000);
        add_segment(&f, "seg2", "u2", 5000, 7000);
        f.manager
            .set_transcript(&f.session_id, "seg1", "Already done.")
            .unwrap();

        let mock = Arc::new(MockTranscriber::new().with_response("Fresh text."));
        let files = processor(&f, mock.clone())
            .process_session(&f.session_id)
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 1);
        let md = std::fs::read_to_string(&files[0]).unwrap();
        assert!(md.contains("Already done."));
        assert!(md.contains("Fresh text."));
    }

    #[tokio::test]
    async fn delivery_receives_the_rendered_files() {
        let f = fixture();
        add_segment(&f, "seg1", "u1", 0, 2000);

        let sink = Arc::new(MockDeliverySink::default());
        let config = TranscriptionConfig {
            concurrency: 1,
            ..TranscriptionConfig::default()
        };
        let processor = SessionProcessor::new(
            f.manager.clone(),
            f.storage.clone(),
            Arc::new(TranscriptionQueue::new(
                Arc::new(MockTranscriber::new().with_response("hello")),
                &config,
            )),
            Some(TranscriptDelivery::new(
                Box::new(SharedSink(sink.clone())),
                8 * 1024 * 1024,
            )),
        );

        let files = processor.process_session(&f.session_id).await.unwrap();
        assert_eq!(sink.deliveries.lock().unwrap()[0], files);
    }
}
