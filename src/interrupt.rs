//! Detects spoken interrupt/cancel phrases during assistant playback.
//!
//! The assistant's own voice is picked back up by the microphone while it
//! plays; naively running STT on that concurrent recording would "hear"
//! the assistant's own words and misfire. This subtracts the assistant's
//! (normalized) text from the recorded (normalized) text before looking
//! for cancel phrases, using a word-level diff via the `similar` crate so
//! repeated or partially-overlapping words resolve unambiguously.

use similar::{ChangeTag, TextDiff};

use crate::model::{ExitSignal, InterruptSignal};

/// Lowercase, alphanumerics-only words, used to normalize both sides
/// before comparing assistant and user text.
fn normalize_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// The words present in `recorded_text` that are not accounted for by
/// `assistant_text` — i.e. what the user actually said, with the
/// assistant's leaked self-capture removed.
pub fn words_added_by_user(assistant_text: &str, recorded_text: &str) -> Vec<String> {
    let assistant_words = normalize_words(assistant_text);
    let recorded_words = normalize_words(recorded_text);
    let assistant_refs: Vec<&str> = assistant_words.iter().map(String::as_str).collect();
    let recorded_refs: Vec<&str> = recorded_words.iter().map(String::as_str).collect();

    let diff = TextDiff::from_slices(&assistant_refs, &recorded_refs);
    diff.iter_all_changes()
        .filter(|change| change.tag() == ChangeTag::Insert)
        .map(|change| change.value().to_string())
        .collect()
}

/// Whether `text`, once normalized, starts with any of `expressions`
/// (also normalized). Used both by the playback-time interrupt watcher
/// and directly against a freshly transcribed utterance, matching the
/// Orchestrator's `Transcribing -> Terminating` exit-phrase edge.
pub fn starts_with_any_expression(expressions: &[String], text: &str) -> bool {
    let normalized = normalize_words(text).join(" ");
    if normalized.is_empty() {
        return false;
    }
    expressions.iter().any(|phrase| {
        let phrase = normalize_words(phrase).join(" ");
        !phrase.is_empty() && normalized.starts_with(phrase.as_str())
    })
}

/// Configuration for phrase matching: case/alphanumerics-normalized
/// substring containment against the user's added words.
pub struct InterruptWatcher {
    cancel_expressions: Vec<String>,
    exit_expressions: Vec<String>,
}

impl InterruptWatcher {
    pub fn new(cancel_expressions: Vec<String>, exit_expressions: Vec<String>) -> Self {
        Self {
            cancel_expressions: cancel_expressions.iter().map(|s| normalize_words(s).join(" ")).collect(),
            exit_expressions: exit_expressions.iter().map(|s| normalize_words(s).join(" ")).collect(),
        }
    }

    /// Inspect one `{assistant_text, recorded_text}` pair captured during
    /// playback of a single sentence, setting `interrupt`/`exit` as needed.
    pub fn check(&self, assistant_text: &str, recorded_text: &str, interrupt: &InterruptSignal, exit: &ExitSignal) {
        let user_words = words_added_by_user(assistant_text, recorded_text).join(" ");
        if user_words.is_empty() {
            return;
        }

        if self.exit_expressions.iter().any(|phrase| user_words.starts_with(phrase.as_str())) {
            exit.set();
            interrupt.set();
            return;
        }

        if self.cancel_expressions.iter().any(|phrase| user_words.contains(phrase.as_str())) {
            interrupt.set();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtracts_assistant_self_capture() {
        let assistant = "let me explain in detail";
        let recorded = "let me explain stop";
        let added = words_added_by_user(assistant, recorded);
        assert_eq!(added, vec!["stop".to_string()]);
    }

    #[test]
    fn cancel_phrase_sets_interrupt() {
        let watcher = InterruptWatcher::new(vec!["stop".into()], vec!["goodbye".into()]);
        let interrupt = InterruptSignal::new();
        let exit = ExitSignal::new();
        watcher.check("let me explain in detail", "let me explain stop", &interrupt, &exit);
        assert!(interrupt.is_set());
        assert!(!exit.is_set());
    }

    #[test]
    fn exit_phrase_sets_both_flags() {
        let watcher = InterruptWatcher::new(vec!["stop".into()], vec!["goodbye".into()]);
        let interrupt = InterruptSignal::new();
        let exit = ExitSignal::new();
        watcher.check("sure, here's more", "goodbye for now", &interrupt, &exit);
        assert!(exit.is_set());
        assert!(interrupt.is_set());
    }

    #[test]
    fn starts_with_any_expression_matches_normalized_prefix() {
        let exprs = vec!["goodbye".to_string(), "quit".to_string()];
        assert!(starts_with_any_expression(&exprs, "Goodbye for now"));
        assert!(!starts_with_any_expression(&exprs, "see you, goodbye"));
    }

    #[test]
    fn no_overlap_words_does_not_interrupt() {
        let watcher = InterruptWatcher::new(vec!["stop".into()], vec!["goodbye".into()]);
        let interrupt = InterruptSignal::new();
        let exit = ExitSignal::new();
        watcher.check("the weather today", "the weather today", &interrupt, &exit);
        assert!(!interrupt.is_set());
        assert!(!exit.is_set());
    }
}
