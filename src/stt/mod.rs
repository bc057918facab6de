//! Speech-to-text module using sherpa-rs.
//!
//! Whisper provides transcription; Silero (via sherpa-rs) provides the
//! frame-level speech classifier fed to the [`crate::vad::VadSegmenter`].

mod recognizer;
mod vad_classifier;

pub use recognizer::Recognizer;
pub use vad_classifier::SherpaFrameClassifier;

use crate::error::Result;
use crate::model::AudioSegment;

/// Contract for converting one audio segment to text.
pub trait SttAdapter {
    /// Returns `None` for empty/whitespace transcriptions (no utterance).
    fn transcribe(&self, segment: &AudioSegment) -> Result<Option<String>>;
}
