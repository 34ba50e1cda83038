//! Timeline assembly from transcribed segments.
//!
//! Segments arrive per speaker and may interleave or overlap in wall-clock
//! time. Merging produces a single chronological utterance list, marking
//! pairs that overlap by more than the threshold so the formatter can label
//! crosstalk instead of silently reordering it.

use crate::defaults::{GROUP_GAP_MS, OVERLAP_THRESHOLD_MS};
use crate::session::types::{Participant, Segment, Utterance};
use std::collections::HashMap;

/// Builds a chronological utterance timeline from transcribed segments.
///
/// Segments without usable text are dropped. Speakers missing from the
/// participant map keep a `User <id>` placeholder name.
pub fn merge_segments(
    segments: &[Segment],
    participants: &HashMap<String, Participant>,
) -> Vec<Utterance> {
    let mut utterances: Vec<Utterance> = segments
        .iter()
        .filter_map(|segment| {
            let text = segment.transcript.as_deref()?.trim();
            if text.is_empty() {
                return None;
            }
            let speaker_name = participants
                .get(&segment.user_id)
                .map(|p| p.display_name.clone())
                .unwrap_or_else(|| format!("User {}", segment.user_id));
            Some(Utterance {
                speaker_name,
                speaker_user_id: segment.user_id.clone(),
                start_ms: segment.start_ms,
                end_ms: segment.end_ms,
                text: text.to_string(),
                overlap: false,
            })
        })
        .collect();

    utterances.sort_by_key(|u| u.start_ms);

    for i in 1..utterances.len() {
        let overlap_ms = utterances[i - 1].end_ms - utterances[i].start_ms;
        if overlap_ms > OVERLAP_THRESHOLD_MS {
            utterances[i - 1].overlap = true;
            utterances[i].overlap = true;
        }
    }

    utterances
}

/// Collapses consecutive utterances from the same speaker.
///
/// Runs are joined with a single space when neither side is flagged as
/// overlapping and the silence between them is under the grouping gap.
pub fn group_by_speaker(utterances: Vec<Utterance>) -> Vec<Utterance> {
    let mut grouped: Vec<Utterance> = Vec::with_capacity(utterances.len());

    for utterance in utterances {
        if let Some(last) = grouped.last_mut()
            && last.speaker_user_id == utterance.speaker_user_id
            && !last.overlap
            && !utterance.overlap
            && utterance.start_ms - last.end_ms < GROUP_GAP_MS
        {
            last.text.push(' ');
            last.text.push_str(&utterance.text);
            last.end_ms = utterance.end_ms;
            continue;
        }
        grouped.push(utterance);
    }

    grouped
}
