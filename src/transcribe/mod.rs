//! Transcription: service backends, the bounded worker queue, and prompt
//! construction.

pub mod prompt;
pub mod queue;
pub mod service;
