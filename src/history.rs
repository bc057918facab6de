//! Conversation transcript and per-reply audio persistence.
//!
//! `ConversationHistory` is an append-only, capacity-bounded transcript
//! ring buffer. `AudioHistory` merges the streamed per-sentence audio for
//! one reply and, if the merged clip is long enough, persists it as MP3
//! and attaches the path to the corresponding transcript turn.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::audio::segment::write_mp3;
use crate::error::Result;
use crate::model::{AudioSegment, ConversationTurn, Role, unix_timestamp};

/// Append-only, capacity-bounded conversation transcript.
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self { turns: VecDeque::with_capacity(max_turns.min(1024)), max_turns }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        if self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Attach `path` to the most recent assistant turn, if any.
    pub fn attach_audio_to_last_assistant_turn(&mut self, path: String) {
        if let Some(turn) = self.turns.iter_mut().rev().find(|t| t.role == Role::Assistant) {
            turn.full_audio_path = Some(path);
        }
    }
}

/// Accumulates streamed reply audio chunks and, on completion, persists
/// the merged clip if it clears the minimum-duration bar.
pub struct AudioHistory {
    cache_dir: PathBuf,
    min_speech_duration_seconds: f64,
    buffer: AudioSegment,
}

impl AudioHistory {
    pub fn new(cache_dir: impl Into<PathBuf>, min_speech_duration_seconds: f64, sample_rate: u32) -> Self {
        Self { cache_dir: cache_dir.into(), min_speech_duration_seconds, buffer: AudioSegment::empty(sample_rate) }
    }

    /// Append one sentence's rendered audio to the in-progress reply buffer.
    pub fn push_chunk(&mut self, chunk: &AudioSegment) {
        self.buffer.extend(chunk);
    }

    /// Call once the reply's audio stream is complete (the "sentinel").
    /// Returns the persisted MP3 path, or `None` if the merged clip was
    /// too short to keep.
    pub fn finish(&mut self) -> Result<Option<String>> {
        let merged = std::mem::replace(&mut self.buffer, AudioSegment::empty(self.buffer.sample_rate()));
        if merged.duration_seconds() < self.min_speech_duration_seconds {
            debug!(duration = merged.duration_seconds(), "reply audio below minimum duration, discarding");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.cache_dir)?;
        let filename = format!("{}.mp3", format_timestamp(unix_timestamp()));
        let path = self.cache_dir.join(&filename);
        if let Err(err) = write_mp3(&merged, &path) {
            warn!(error = %err, "failed to persist reply audio");
            return Ok(None);
        }
        Ok(Some(path.to_string_lossy().to_string()))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Drop the in-progress reply buffer without persisting it, e.g.
    /// when the reply was cut short by an interrupt.
    pub fn discard(&mut self) {
        self.buffer = AudioSegment::empty(self.buffer.sample_rate());
    }
}

/// Render a Unix timestamp as an ISO-8601-ish sortable filename stem.
fn format_timestamp(ts: f64) -> String {
    let secs = ts.trunc() as i64;
    let millis = ((ts.fract()) * 1000.0).round() as i64;
    let datetime = chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default();
    format!("{}_{:03}", datetime.format("%Y%m%dT%H%M%S"), millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_at_capacity() {
        let mut history = ConversationHistory::new(2);
        history.push(ConversationTurn::new(Role::User, "user", "one"));
        history.push(ConversationTurn::new(Role::Assistant, "assistant", "two"));
        history.push(ConversationTurn::new(Role::User, "user", "three"));
        assert_eq!(history.len(), 2);
        let contents: Vec<_> = history.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[test]
    fn attaches_audio_to_last_assistant_turn() {
        let mut history = ConversationHistory::new(10);
        history.push(ConversationTurn::new(Role::User, "user", "hi"));
        history.push(ConversationTurn::new(Role::Assistant, "assistant", "hello"));
        history.attach_audio_to_last_assistant_turn("clip.mp3".into());
        let last = history.turns().last().unwrap();
        assert_eq!(last.full_audio_path.as_deref(), Some("clip.mp3"));
    }

    #[test]
    fn short_reply_audio_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut audio_history = AudioHistory::new(dir.path(), 1.0, 16000);
        audio_history.push_chunk(&AudioSegment::from_samples(vec![0i16; 100], 16000));
        let result = audio_history.finish().unwrap();
        assert!(result.is_none());
    }
}
