//! Core session records.
//!
//! These types are owned by the [`SessionManager`](super::manager::SessionManager)
//! and mutated only through its methods; everything here is plain data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Session states throughout the recording lifecycle.
///
/// Success loop: `Idle → Recording → Stopping → Transcribing → Delivering → Idle`.
/// `Error` is reached when a stop finds no segments or processing fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Recording,
    Stopping,
    Transcribing,
    Delivering,
    Error,
}

/// Core session metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub guild_id: String,
    pub voice_channel_id: String,
    pub text_channel_id: String,
    /// Unix milliseconds.
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    pub state: SessionState,
    pub participants: HashMap<String, Participant>,
    /// Insertion-ordered, case-sensitive, normalized terms.
    pub glossary: Vec<String>,
}

impl Session {
    /// Session duration in milliseconds, if the session has ended.
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

/// Participant in a recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub display_name: String,
    /// Consent snapshot taken when the participant joined the session.
    pub consented: bool,
}

/// Audio segment from a single speaker.
///
/// Immutable after capture except for transcript assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub segment_id: String,
    pub session_id: String,
    pub user_id: String,
    /// Relative to session start, pre-roll adjusted.
    pub start_ms: i64,
    pub end_ms: i64,
    pub audio_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// Utterance after transcription, projected into the shared session timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub speaker_name: String,
    pub speaker_user_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    /// Set when this utterance intersects a neighbor by more than the
    /// overlap threshold.
    pub overlap: bool,
}

/// Current wall-clock time as unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
