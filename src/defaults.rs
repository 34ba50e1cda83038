//! Default configuration constants for tablescribe.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and upload size for voice sessions.
pub const SAMPLE_RATE: u32 = 16000;

/// Number of audio channels for captured segments.
///
/// Per-speaker streams are mono by construction.
pub const CHANNELS: u16 = 1;

/// Bytes per PCM sample (16-bit signed).
pub const BYTES_PER_SAMPLE: u32 = 2;

/// Pre-roll buffer duration in milliseconds.
///
/// Audio kept per speaker while idle, prepended when a speaking event fires.
/// Captures soft onsets (plosives, fricatives) that occur before the platform
/// reports speech.
pub const PRE_ROLL_MS: u32 = 500;

/// Trailing silence duration in milliseconds before a capture stream ends.
///
/// 1000ms allows for natural pauses without splitting a sentence into
/// separate segments.
pub const SILENCE_DURATION_MS: u32 = 1000;

/// Default number of concurrent transcription workers.
pub const TRANSCRIPTION_CONCURRENCY: usize = 6;

/// Default maximum transcription attempts per segment.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential transcription backoff, in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Hard upper bound on a single transcription request, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Minimum overlap between adjacent utterances to flag simultaneous speech,
/// in milliseconds.
///
/// Shorter intersections are treated as turn-taking jitter, not crosstalk.
pub const OVERLAP_THRESHOLD_MS: i64 = 500;

/// Maximum gap between same-speaker utterances that may be merged into one
/// paragraph, in milliseconds.
pub const GROUP_GAP_MS: i64 = 2000;

/// Maximum length of a glossary term after normalization.
pub const GLOSSARY_TERM_MAX_LEN: usize = 80;

/// Maximum number of glossary terms included in a transcription prompt.
pub const GLOSSARY_PROMPT_LIMIT: usize = 200;

/// Combined upload ceiling for transcript delivery, in bytes.
///
/// Attachments beyond this size defer to a path notification instead.
pub const MAX_UPLOAD_BYTES: u64 = 8 * 1024 * 1024;

/// Default session data retention, in days.
pub const RETENTION_DAYS: u32 = 7;

/// Duration of PCM bytes at the given sample rate, in milliseconds.
///
/// Used both for ring-buffer accounting and for segment timing, so eviction
/// stays self-consistent even when caller-supplied durations carry rounding
/// error.
pub fn pcm_duration_ms(byte_len: usize, sample_rate: u32) -> f64 {
    let samples = byte_len as f64 / BYTES_PER_SAMPLE as f64;
    samples / sample_rate as f64 * 1000.0
}
