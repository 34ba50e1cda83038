//! Error types for tablescribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio decode failed: {message}")]
    Decode { message: String },

    #[error("Voice capture failed: {message}")]
    Capture { message: String },

    // Transcription errors
    #[error("Transcription request failed: {message}")]
    Transcription {
        message: String,
        status: Option<u16>,
        retry_after_ms: Option<u64>,
        rate_limit: bool,
    },

    // Durable storage errors
    #[error("Persistence write failed: {message}")]
    Persistence { message: String },

    // Lookup errors
    #[error("Unknown {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    // Input validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ScribeError {
    /// Shorthand for a plain transcription failure with no HTTP context.
    pub fn transcription(message: impl Into<String>) -> Self {
        ScribeError::Transcription {
            message: message.into(),
            status: None,
            retry_after_ms: None,
            rate_limit: false,
        }
    }

    /// Lookup failure for a session id.
    pub fn session_not_found(id: impl Into<String>) -> Self {
        ScribeError::NotFound {
            kind: "session",
            id: id.into(),
        }
    }

    /// Whether the transcription boundary may be retried for this error.
    ///
    /// A 429 or any 5xx is retryable, as are transport-level failures that
    /// carry no HTTP status. Other client errors are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScribeError::Transcription { status, .. } => match status {
                Some(429) => true,
                Some(s) => *s >= 500,
                None => true,
            },
            _ => false,
        }
    }

    /// Server-supplied retry hint in milliseconds, when present.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ScribeError::Transcription { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ScribeError>;
