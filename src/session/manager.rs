//! Session state machine and owning store.
//!
//! All session, participant, glossary, and segment mutation funnels through
//! this type. Every state-affecting mutation also enqueues a best-effort
//! durable write; persistence failures are logged and never surfaced, so the
//! in-memory state stays authoritative for the live process.

use crate::defaults::GLOSSARY_TERM_MAX_LEN;
use crate::error::{Result, ScribeError};
use crate::session::persistence::{RestoredState, SessionPersistence};
use crate::session::types::{now_ms, Participant, Segment, Session, SessionState};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Live platform voice connection, released when recording stops.
pub trait VoiceConnection: Send + Sync {
    fn disconnect(&self);
}

/// Outcome of one glossary add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlossaryAdd {
    /// Term accepted; carries the normalized form that was stored.
    Added(String),
    /// Normalized form already present; carries it.
    Duplicate(String),
    /// Empty after normalization or longer than the term limit.
    Invalid,
}

struct Inner {
    sessions: HashMap<String, Session>,
    segments: HashMap<String, Vec<Segment>>,
    connections: HashMap<String, Box<dyn VoiceConnection>>,
}

/// Owns every session for the process.
pub struct SessionManager {
    inner: Mutex<Inner>,
    persistence: Option<SessionPersistence>,
}

impl SessionManager {
    pub fn new(persistence: SessionPersistence) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                segments: HashMap::new(),
                connections: HashMap::new(),
            }),
            persistence: Some(persistence),
        }
    }

    /// Manager without durable storage, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                segments: HashMap::new(),
                connections: HashMap::new(),
            }),
            persistence: None,
        }
    }

    /// Creates a fresh session in `Idle` with a unique id.
    pub fn create_session(
        &self,
        guild_id: &str,
        voice_channel_id: &str,
        text_channel_id: &str,
    ) -> Session {
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            guild_id: guild_id.to_string(),
            voice_channel_id: voice_channel_id.to_string(),
            text_channel_id: text_channel_id.to_string(),
            started_at: now_ms(),
            ended_at: None,
            state: SessionState::Idle,
            participants: HashMap::new(),
            glossary: Vec::new(),
        };

        {
            let mut inner = self.lock();
            inner.sessions.insert(session.session_id.clone(), session.clone());
            inner.segments.insert(session.session_id.clone(), Vec::new());
        }

        self.persist_session(session.clone());
        session
    }

    /// Point-in-time snapshot of a session.
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.lock().sessions.get(session_id).cloned()
    }

    /// The guild's currently recording session, if any.
    pub fn session_by_guild(&self, guild_id: &str) -> Option<Session> {
        self.lock()
            .sessions
            .values()
            .find(|s| s.guild_id == guild_id && s.state == SessionState::Recording)
            .cloned()
    }

    pub fn all_sessions(&self) -> Vec<Session> {
        self.lock().sessions.values().cloned().collect()
    }

    /// Transitions a session to a new state.
    ///
    /// Moving to `Recording` enforces the one-recording-per-guild invariant.
    pub fn update_state(&self, session_id: &str, state: SessionState) -> Result<()> {
        let snapshot = {
            let mut inner = self.lock();

            if state == SessionState::Recording {
                let guild_id = inner
                    .sessions
                    .get(session_id)
                    .map(|s| s.guild_id.clone())
                    .ok_or_else(|| ScribeError::session_not_found(session_id))?;
                let conflict = inner.sessions.values().any(|s| {
                    s.guild_id == guild_id
                        && s.state == SessionState::Recording
                        && s.session_id != session_id
                });
                if conflict {
                    return Err(ScribeError::Validation {
                        message: format!("guild {guild_id} already has a recording session"),
                    });
                }
            }

            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| ScribeError::session_not_found(session_id))?;
            session.state = state;
            session.clone()
        };

        self.persist_session(snapshot);
        Ok(())
    }

    pub fn add_participant(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        consented: bool,
    ) -> Result<()> {
        let snapshot = {
            let mut inner = self.lock();
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| ScribeError::session_not_found(session_id))?;
            session.participants.insert(
                user_id.to_string(),
                Participant {
                    user_id: user_id.to_string(),
                    display_name: display_name.to_string(),
                    consented,
                },
            );
            session.clone()
        };

        self.persist_session(snapshot);
        Ok(())
    }

    pub fn remove_participant(&self, session_id: &str, user_id: &str) -> Result<()> {
        let snapshot = {
            let mut inner = self.lock();
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| ScribeError::session_not_found(session_id))?;
            session.participants.remove(user_id);
            session.clone()
        };

        self.persist_session(snapshot);
        Ok(())
    }

    pub fn participant(&self, session_id: &str, user_id: &str) -> Option<Participant> {
        self.lock()
            .sessions
            .get(session_id)?
            .participants
            .get(user_id)
            .cloned()
    }

    /// Normalizes and appends a glossary term.
    pub fn add_glossary_term(&self, session_id: &str, term: &str) -> Result<GlossaryAdd> {
        let normalized = normalize_term(term);
        if normalized.is_empty() || normalized.chars().count() > GLOSSARY_TERM_MAX_LEN {
            return Ok(GlossaryAdd::Invalid);
        }

        let (result, snapshot) = {
            let mut inner = self.lock();
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| ScribeError::session_not_found(session_id))?;

            if session.glossary.contains(&normalized) {
                return Ok(GlossaryAdd::Duplicate(normalized));
            }
            session.glossary.push(normalized.clone());
            (GlossaryAdd::Added(normalized), session.clone())
        };

        self.persist_session(snapshot);
        Ok(result)
    }

    pub fn glossary(&self, session_id: &str) -> Vec<String> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|s| s.glossary.clone())
            .unwrap_or_default()
    }

    /// Registers a finalized segment.
    pub fn add_segment(&self, session_id: &str, segment: Segment) -> Result<()> {
        let snapshot = {
            let mut inner = self.lock();
            if !inner.sessions.contains_key(session_id) {
                return Err(ScribeError::session_not_found(session_id));
            }
            let segments = inner.segments.entry(session_id.to_string()).or_default();
            segments.push(segment);
            segments.clone()
        };

        self.persist_segments(session_id, snapshot);
        Ok(())
    }

    pub fn segments(&self, session_id: &str) -> Vec<Segment> {
        self.lock()
            .segments
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Assigns a transcript to an existing segment.
    pub fn set_transcript(&self, session_id: &str, segment_id: &str, text: &str) -> Result<()> {
        let snapshot = {
            let mut inner = self.lock();
            let segments = inner
                .segments
                .get_mut(session_id)
                .ok_or_else(|| ScribeError::session_not_found(session_id))?;
            let segment = segments
                .iter_mut()
                .find(|s| s.segment_id == segment_id)
                .ok_or(ScribeError::NotFound {
                    kind: "segment",
                    id: segment_id.to_string(),
                })?;
            segment.transcript = Some(text.to_string());
            segments.clone()
        };

        self.persist_segments(session_id, snapshot);
        Ok(())
    }

    pub fn set_voice_connection(&self, session_id: &str, connection: Box<dyn VoiceConnection>) {
        self.lock()
            .connections
            .insert(session_id.to_string(), connection);
    }

    /// Ends a session: sets `ended_at`, moves to `Stopping`, and releases the
    /// live voice connection if one is held.
    pub fn stop_session(&self, session_id: &str) -> Result<Session> {
        let (snapshot, connection) = {
            let mut inner = self.lock();
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| ScribeError::session_not_found(session_id))?;
            session.ended_at = Some(now_ms());
            session.state = SessionState::Stopping;
            let snapshot = session.clone();
            (snapshot, inner.connections.remove(session_id))
        };

        if let Some(connection) = connection {
            connection.disconnect();
        }

        self.persist_session(snapshot.clone());
        Ok(snapshot)
    }

    /// Drops a session and its in-memory segments.
    pub fn delete_session(&self, session_id: &str) {
        let mut inner = self.lock();
        inner.sessions.remove(session_id);
        inner.segments.remove(session_id);
        inner.connections.remove(session_id);
    }

    /// Loads persisted sessions into memory after a restart.
    ///
    /// A session left in `Recording` cannot resume capture; it is demoted to
    /// `Stopping` with `ended_at` set so processing can pick it up. Returns
    /// the ids of sessions eligible for automatic re-processing.
    pub fn restore(&self, restored: RestoredState) -> Vec<String> {
        let mut resumable = Vec::new();
        let mut demoted = Vec::new();

        {
            let mut inner = self.lock();
            for mut session in restored.sessions {
                if session.state == SessionState::Recording {
                    warn!(
                        session_id = %session.session_id,
                        "session was recording at shutdown, demoting to stopping"
                    );
                    session.state = SessionState::Stopping;
                    session.ended_at = Some(now_ms());
                    demoted.push(session.clone());
                }

                if matches!(
                    session.state,
                    SessionState::Stopping | SessionState::Transcribing
                ) {
                    resumable.push(session.session_id.clone());
                }

                inner
                    .segments
                    .insert(session.session_id.clone(), Vec::new());
                inner
                    .sessions
                    .insert(session.session_id.clone(), session);
            }

            for (session_id, segments) in restored.segments_by_session {
                inner.segments.insert(session_id, segments);
            }
        }

        for session in demoted {
            self.persist_session(session);
        }

        info!(
            restored = self.lock().sessions.len(),
            resumable = resumable.len(),
            "session state restored"
        );
        resumable
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning would mean a panic while holding the lock; the
        // session store is still the best state we have, so keep going.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Best-effort durable write; the caller never observes failure.
    fn persist_session(&self, session: Session) {
        if let Some(persistence) = self.persistence.clone() {
            tokio::spawn(async move {
                if let Err(e) = persistence.save_session(&session).await {
                    error!(session_id = %session.session_id, "session persistence failed: {e}");
                }
            });
        }
    }

    fn persist_segments(&self, session_id: &str, segments: Vec<Segment>) {
        if let Some(persistence) = self.persistence.clone() {
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = persistence.save_segments(&session_id, &segments).await {
                    error!(session_id = %session_id, "segment persistence failed: {e}");
                }
            });
        }
    }
}

/// Strips control characters, collapses whitespace runs, and trims.
fn normalize_term(term: &str) -> String {
    let stripped: String = term.chars().filter(|c| !c.is_control()).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
