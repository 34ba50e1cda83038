//! End-to-end lifecycle: record, crash, restore, transcribe, deliver.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tablescribe::config::{AudioConfig, TranscriptionConfig};
use tablescribe::session::manager::SessionManager;
use tablescribe::session::persistence::SessionPersistence;
use tablescribe::session::processor::SessionProcessor;
use tablescribe::session::types::SessionState;
use tablescribe::storage::StorageManager;
use tablescribe::transcribe::queue::TranscriptionQueue;
use tablescribe::transcribe::service::MockTranscriber;
use tablescribe::voice::capture::{AudioSubscription, MockVoiceSource, VoiceCaptureEngine};
use tempfile::tempdir;
use tokio::time::{sleep, Instant};

async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

fn file_contains(path: &Path, needle: &str) -> bool {
    std::fs::read_to_string(path)
        .map(|contents| contents.contains(needle))
        .unwrap_or(false)
}

#[tokio::test]
async fn interrupted_session_is_recovered_and_transcribed() {
    let dir = tempdir().unwrap();
    let storage = StorageManager::new(dir.path().to_path_buf());
    storage.initialize().await.unwrap();

    // First process lifetime: record one utterance, then "crash" after stop.
    let manager = Arc::new(SessionManager::new(SessionPersistence::new(storage.clone())));
    let session = manager.create_session("guild-1", "voice-1", "text-1");
    let session_id = session.session_id.clone();
    manager
        .add_participant(&session_id, "u1", "Alice", true)
        .unwrap();
    manager
        .add_participant(&session_id, "u2", "Bob", false)
        .unwrap();
    manager
        .update_state(&session_id, SessionState::Recording)
        .unwrap();
    let session = manager.get_session(&session_id).unwrap();

    let source = Arc::new(MockVoiceSource::new());
    let (tx, subscription) = AudioSubscription::channel(8);
    tx.try_send(Ok(vec![1, 2, 3, 4])).unwrap();
    drop(tx);
    source.push_capture("u1", subscription);

    let engine = VoiceCaptureEngine::new(
        manager.clone(),
        storage.clone(),
        source.clone(),
        AudioConfig::default(),
        &session,
    );
    engine.start(&session).await.unwrap();
    source.speaking_start("u1");
    // Non-consenting speaker must leave no trace.
    source.speaking_start("u2");

    {
        let manager = manager.clone();
        let session_id = session_id.clone();
        wait_until(|| !manager.segments(&session_id).is_empty(), "captured segment").await;
    }
    assert_eq!(manager.segments(&session_id).len(), 1);
    assert!(manager.segments(&session_id)[0].audio_path.exists());

    manager.stop_session(&session_id).unwrap();
    engine.stop();

    // Durable records land asynchronously; wait for the stop to be visible.
    let session_file = storage.session_dir(&session_id).join("session.json");
    let segments_file = storage.segment_dir(&session_id).join("segments.json");
    wait_until(
        || file_contains(&session_file, "STOPPING"),
        "persisted stop state",
    )
    .await;
    wait_until(|| segments_file.exists(), "persisted segments").await;

    drop(engine);
    drop(manager);

    // Second process lifetime: restore and finish the session.
    let persistence = SessionPersistence::new(storage.clone());
    let restored = persistence.load_all().await.unwrap();
    let manager = Arc::new(SessionManager::new(persistence));
    let resumable = manager.restore(restored);
    assert_eq!(resumable, vec![session_id.clone()]);

    let restored_session = manager.get_session(&session_id).unwrap();
    assert_eq!(restored_session.state, SessionState::Stopping);
    assert_eq!(restored_session.participants.len(), 2);
    assert_eq!(manager.segments(&session_id).len(), 1);

    let transcriber = Arc::new(MockTranscriber::new().with_response("We head into the crypt."));
    let queue = Arc::new(TranscriptionQueue::new(
        transcriber.clone(),
        &TranscriptionConfig {
            concurrency: 1,
            ..TranscriptionConfig::default()
        },
    ));
    let processor = SessionProcessor::new(manager.clone(), storage.clone(), queue, None);

    let files = processor.process_session(&session_id).await.unwrap();
    assert_eq!(transcriber.call_count(), 1);
    assert_eq!(files.len(), 3);

    let markdown = std::fs::read_to_string(&files[0]).unwrap();
    assert!(markdown.contains("# Session Transcript"));
    assert!(markdown.contains("Alice:** We head into the crypt."));
    assert!(!markdown.contains("Bob:**"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&files[1]).unwrap()).unwrap();
    assert_eq!(json["sessionId"], session_id.as_str());
    assert_eq!(json["utterances"][0]["speaker"], "Alice");

    let srt = std::fs::read_to_string(&files[2]).unwrap();
    assert!(srt.starts_with("1\n"));
    assert!(srt.contains("Alice: We head into the crypt."));

    assert_eq!(
        manager.get_session(&session_id).unwrap().state,
        SessionState::Idle
    );
}

#[tokio::test]
async fn recording_session_is_demoted_on_restore() {
    let dir = tempdir().unwrap();
    let storage = StorageManager::new(dir.path().to_path_buf());
    storage.initialize().await.unwrap();

    let manager = Arc::new(SessionManager::new(SessionPersistence::new(storage.clone())));
    let session = manager.create_session("guild-1", "voice-1", "text-1");
    manager
        .update_state(&session.session_id, SessionState::Recording)
        .unwrap();

    let session_file = storage.session_dir(&session.session_id).join("session.json");
    wait_until(
        || file_contains(&session_file, "RECORDING"),
        "persisted recording state",
    )
    .await;
    drop(manager);

    let persistence = SessionPersistence::new(storage.clone());
    let restored = persistence.load_all().await.unwrap();
    let manager = Arc::new(SessionManager::new(persistence));
    let resumable = manager.restore(restored);

    assert_eq!(resumable, vec![session.session_id.clone()]);
    let demoted = manager.get_session(&session.session_id).unwrap();
    assert_eq!(demoted.state, SessionState::Stopping);
    assert!(demoted.ended_at.is_some());
}
