//! Glossary-aware transcription prompts.

use crate::defaults::GLOSSARY_PROMPT_LIMIT;

const FALLBACK_PROMPT: &str =
    "This is a D&D session. Please preserve capitalization of proper nouns and spell names.";

/// Builds the prompt sent alongside every audio upload.
///
/// Glossary terms bias the recognizer toward campaign-specific spellings.
/// Only the first [`GLOSSARY_PROMPT_LIMIT`] terms are included to keep the
/// prompt within the service's context budget.
pub fn build_prompt(glossary: &[String]) -> String {
    if glossary.is_empty() {
        return FALLBACK_PROMPT.to_string();
    }

    let terms = glossary
        .iter()
        .take(GLOSSARY_PROMPT_LIMIT)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("This is a D&D session. Proper nouns and terms: {terms}. Please preserve capitalization.")
}
