//! Speech-to-text backends.
//!
//! The [`Transcriber`] trait is the seam between the queue and whatever
//! service does the actual recognition. The shipped backend talks to any
//! OpenAI-compatible `/audio/transcriptions` endpoint.

use crate::config::TranscriptionConfig;
use crate::error::{Result, ScribeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::multipart;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Transcribes one audio file into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_path: &Path, prompt: &str) -> Result<String>;
}

/// Subset of the verbose JSON response we consume.
#[derive(Debug, Deserialize)]
struct VerboseResponse {
    text: String,
}

/// Backend for OpenAI-compatible transcription endpoints.
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScribeError::transcription(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio_path: &Path, prompt: &str) -> Result<String> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.wav".to_string());

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| ScribeError::transcription(format!("invalid upload part: {e}")))?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .text("prompt", prompt.to_string());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScribeError::transcription(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = retry_after_ms(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(ScribeError::Transcription {
                message: format!("service returned {status}: {body}"),
                status: Some(status.as_u16()),
                retry_after_ms,
                rate_limit: status.as_u16() == 429,
            });
        }

        let parsed: VerboseResponse = response
            .json()
            .await
            .map_err(|e| ScribeError::transcription(format!("malformed response: {e}")))?;
        Ok(parsed.text)
    }
}

/// Extracts a retry delay from rate-limit response headers.
///
/// `Retry-After` carries either delta-seconds or an HTTP-date; OpenAI also
/// sends `x-ratelimit-reset-requests` with an `ms`/`s` suffix.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        if let Ok(secs) = value.parse::<f64>() {
            return Some((secs * 1000.0) as u64);
        }
        if let Ok(date) = DateTime::parse_from_rfc2822(value) {
            let delta = date.with_timezone(&Utc) - Utc::now();
            return Some(delta.num_milliseconds().max(0) as u64);
        }
    }

    headers
        .get("x-ratelimit-reset-requests")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_reset_window)
}

/// Parses `250ms`, `1.5s`, or bare seconds. Compound forms like `1m30s`
/// are not produced for sub-minute windows and are ignored.
fn parse_reset_window(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.parse::<f64>().ok().map(|v| v as u64);
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.parse::<f64>().ok().map(|v| (v * 1000.0) as u64);
    }
    value.parse::<f64>().ok().map(|v| (v * 1000.0) as u64)
}

/// Scripted transcriber for tests.
pub struct MockTranscriber {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<String>>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_response(self, text: &str) -> Self {
        self.push(Ok(text.to_string()));
        self
    }

    pub fn with_failure(self, error: ScribeError) -> Self {
        self.push(Err(error));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn push(&self, response: Result<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio_path: &Path, _prompt: &str) -> Result<String> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front());
        match next {
            Some(response) => response,
            None => Ok(String::new()),
        }
    }
}
