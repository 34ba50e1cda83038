//! tablescribe - Tabletop session recording and transcription
//!
//! Captures per-speaker voice audio, transcribes it with an
//! OpenAI-compatible service, and merges the results into a single
//! chronological transcript.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod config;
pub mod defaults;
pub mod delivery;
pub mod error;
pub mod merge;
pub mod session;
pub mod storage;
pub mod transcribe;
pub mod voice;

// Core seams (capture → transcribe → deliver)
pub use delivery::{DeliverySink, TranscriptDelivery};
pub use transcribe::service::Transcriber;
pub use voice::capture::{VoiceCaptureEngine, VoiceSource};

// Session lifecycle
pub use session::manager::SessionManager;
pub use session::persistence::SessionPersistence;
pub use session::processor::SessionProcessor;
pub use session::types::{Session, SessionState};

// Error handling
pub use error::{Result, ScribeError};

// Config
pub use config::Config;
