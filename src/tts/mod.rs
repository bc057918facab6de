//! Text-to-speech module using sherpa-rs.
//!
//! Provides speech synthesis using Kokoro models.

mod synthesizer;

pub use synthesizer::Synthesizer;

use crate::error::Result;
use crate::model::SpeechItem;

/// Contract for rendering one sentence to audio.
pub trait TtsAdapter {
    fn synthesize(&mut self, sentence: &str) -> Result<SpeechItem>;
}
