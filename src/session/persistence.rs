//! Durable session records.
//!
//! Each session owns a directory: `session.json` carries identity, state,
//! timestamps, participants, and glossary; `segments.json` is the whole
//! segment list, rewritten wholesale whenever the set changes. Reads are
//! tolerant: a corrupt record is logged and skipped so one bad session
//! cannot block recovery of the rest.

use crate::error::{Result, ScribeError};
use crate::session::types::{Participant, Segment, Session, SessionState};
use crate::storage::StorageManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// On-disk shape of a session record.
///
/// Participants are stored as an array rather than a map.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSession {
    session_id: String,
    guild_id: String,
    voice_channel_id: String,
    text_channel_id: String,
    started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<i64>,
    state: SessionState,
    participants: Vec<Participant>,
    glossary: Vec<String>,
}

impl From<&Session> for PersistedSession {
    fn from(session: &Session) -> Self {
        let mut participants: Vec<Participant> =
            session.participants.values().cloned().collect();
        participants.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        Self {
            session_id: session.session_id.clone(),
            guild_id: session.guild_id.clone(),
            voice_channel_id: session.voice_channel_id.clone(),
            text_channel_id: session.text_channel_id.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            state: session.state,
            participants,
            glossary: session.glossary.clone(),
        }
    }
}

impl From<PersistedSession> for Session {
    fn from(data: PersistedSession) -> Self {
        let participants = data
            .participants
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();

        Session {
            session_id: data.session_id,
            guild_id: data.guild_id,
            voice_channel_id: data.voice_channel_id,
            text_channel_id: data.text_channel_id,
            started_at: data.started_at,
            ended_at: data.ended_at,
            state: data.state,
            participants,
            glossary: data.glossary,
        }
    }
}

/// Everything found on disk at startup.
#[derive(Debug, Default)]
pub struct RestoredState {
    pub sessions: Vec<Session>,
    pub segments_by_session: HashMap<String, Vec<Segment>>,
}

/// Writes and reloads durable session records.
#[derive(Debug, Clone)]
pub struct SessionPersistence {
    storage: StorageManager,
}

impl SessionPersistence {
    pub fn new(storage: StorageManager) -> Self {
        Self { storage }
    }

    /// Durably writes a session record.
    pub async fn save_session(&self, session: &Session) -> Result<()> {
        self.storage
            .create_session_dirs(&session.session_id)
            .await
            .map_err(persistence_err)?;

        let data = PersistedSession::from(session);
        let json = serde_json::to_vec_pretty(&data).map_err(persistence_err)?;
        let path = self.storage.session_dir(&session.session_id).join("session.json");
        tokio::fs::write(path, json).await.map_err(persistence_err)?;
        Ok(())
    }

    /// Rewrites the full segment list for a session.
    pub async fn save_segments(&self, session_id: &str, segments: &[Segment]) -> Result<()> {
        self.storage
            .create_session_dirs(session_id)
            .await
            .map_err(persistence_err)?;

        let json = serde_json::to_vec_pretty(segments).map_err(persistence_err)?;
        let path = self.storage.segment_dir(session_id).join("segments.json");
        tokio::fs::write(path, json).await.map_err(persistence_err)?;
        Ok(())
    }

    /// Reloads every stored session and its segments.
    ///
    /// Corrupt records are logged and skipped.
    pub async fn load_all(&self) -> Result<RestoredState> {
        let mut restored = RestoredState::default();

        let mut entries = match tokio::fs::read_dir(self.storage.sessions_root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(restored),
            Err(e) => return Err(e.into()),
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let session_id = entry.file_name().to_string_lossy().to_string();

            match self.load_session(&session_id).await {
                Ok(session) => restored.sessions.push(session),
                Err(e) => {
                    warn!(session_id, "failed to load session record: {e}");
                    continue;
                }
            }

            match self.load_segments(&session_id).await {
                Ok(Some(segments)) => {
                    restored.segments_by_session.insert(session_id, segments);
                }
                Ok(None) => {}
                Err(e) => warn!(session_id, "failed to load segment records: {e}"),
            }
        }

        Ok(restored)
    }

    async fn load_session(&self, session_id: &str) -> Result<Session> {
        let path = self.storage.session_dir(session_id).join("session.json");
        let raw = tokio::fs::read(path).await?;
        let data: PersistedSession = serde_json::from_slice(&raw)?;
        Ok(data.into())
    }

    async fn load_segments(&self, session_id: &str) -> Result<Option<Vec<Segment>>> {
        let path = self.storage.segment_dir(session_id).join("segments.json");
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

fn persistence_err(e: impl std::fmt::Display) -> ScribeError {
    ScribeError::Persistence {
        message: e.to_string(),
    }
}
