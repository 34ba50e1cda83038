//! Transcript rendering.
//!
//! One utterance timeline renders into three artifacts: a readable
//! Markdown transcript, a machine-friendly JSON document, and an SRT
//! subtitle track aligned to the recording clock.

use crate::error::Result;
use crate::session::types::{Session, Utterance};
use chrono::DateTime;
use serde::Serialize;

/// Renders the Markdown transcript.
pub fn format_markdown(session: &Session, utterances: &[Utterance]) -> String {
    let mut participants: Vec<&str> = session
        .participants
        .values()
        .map(|p| p.display_name.as_str())
        .collect();
    participants.sort_unstable();

    let date = DateTime::from_timestamp_millis(session.started_at)
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut out = String::new();
    out.push_str("# Session Transcript\n\n");
    out.push_str(&format!("**Date:** {date}\n"));
    if let Some(duration) = session.duration_ms() {
        out.push_str(&format!("**Duration:** {}\n", clock(duration)));
    }
    out.push_str(&format!("**Participants:** {}\n", participants.join(", ")));
    out.push_str("\n---\n\n");

    for utterance in utterances {
        let marker = if utterance.overlap { " (overlapping)" } else { "" };
        out.push_str(&format!(
            "**[{}] {}{marker}:** {}\n\n",
            clock(utterance.start_ms),
            utterance.speaker_name,
            utterance.text
        ));
    }

    out
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonTranscript<'a> {
    session_id: &'a str,
    started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<i64>,
    utterances: Vec<JsonUtterance<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonUtterance<'a> {
    speaker: &'a str,
    user_id: &'a str,
    start_ms: i64,
    end_ms: i64,
    text: &'a str,
    overlap: bool,
}

/// Renders the JSON transcript.
pub fn format_json(session: &Session, utterances: &[Utterance]) -> Result<String> {
    let doc = JsonTranscript {
        session_id: &session.session_id,
        started_at: session.started_at,
        duration_ms: session.duration_ms(),
        utterances: utterances
            .iter()
            .map(|u| JsonUtterance {
                speaker: &u.speaker_name,
                user_id: &u.speaker_user_id,
                start_ms: u.start_ms,
                end_ms: u.end_ms,
                text: &u.text,
                overlap: u.overlap,
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Renders the SRT subtitle track.
pub fn format_srt(utterances: &[Utterance]) -> String {
    let mut out = String::new();
    for (index, utterance) in utterances.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}: {}\n\n",
            index + 1,
            srt_timestamp(utterance.start_ms),
            srt_timestamp(utterance.end_ms),
            utterance.speaker_name,
            utterance.text
        ));
    }
    out
}

/// `MM:SS` from a recording-relative offset; minutes run past 59.
fn clock(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

/// `HH:MM:SS,mmm` as SRT requires.
fn srt_timestamp(ms: i64) -> String {
    let ms = ms.max(0);
    let millis = ms % 1000;
    let total_secs = ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{millis:03}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60
    )
}
