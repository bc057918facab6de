//! Shared data types flowing between the engine's pipeline stages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed-size mono PCM16 buffer captured from the microphone.
///
/// Block size is `sample_rate * frame_duration_ms / 1000` samples, set by
/// the capture pipeline; frames are immutable once produced.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Quantize a device-native f32 buffer into an `AudioFrame`.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        let quantized = samples.iter().map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).collect();
        Self::new(quantized, sample_rate)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A finite sequence of `AudioFrame`s concatenated into one clip.
#[derive(Debug, Clone, Default)]
pub struct AudioSegment {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioSegment {
    pub fn empty(sample_rate: u32) -> Self {
        Self { samples: Vec::new(), sample_rate }
    }

    pub fn from_frames(frames: &[AudioFrame]) -> Self {
        let sample_rate = frames.first().map(|f| f.sample_rate).unwrap_or(16000);
        let mut samples = Vec::with_capacity(frames.iter().map(|f| f.samples.len()).sum());
        for frame in frames {
            samples.extend_from_slice(&frame.samples);
        }
        Self { samples, sample_rate }
    }

    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn extend(&mut self, other: &AudioSegment) {
        if self.samples.is_empty() {
            self.sample_rate = other.sample_rate;
        }
        self.samples.extend_from_slice(&other.samples);
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert to normalized f32 samples, e.g. for a TTS/STT adapter or playback.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
    }
}

/// An `AudioSegment` the VAD segmenter has classified as containing speech.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub audio: AudioSegment,
}

/// Tagged content yielded by a streaming LLM reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyChunkKind {
    Text,
    Code,
}

#[derive(Debug, Clone)]
pub struct ReplyChunk {
    pub kind: ReplyChunkKind,
    pub content: String,
}

impl ReplyChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self { kind: ReplyChunkKind::Text, content: content.into() }
    }

    pub fn code(content: impl Into<String>) -> Self {
        Self { kind: ReplyChunkKind::Code, content: content.into() }
    }
}

/// Token usage reported by one LLM call, possibly partial if abandoned mid-stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub n_input_tokens: i64,
    pub n_output_tokens: i64,
}

/// A chunker-emitted, speakable unit of text.
pub type Sentence = String;

/// The audio rendered for one `Sentence`.
#[derive(Debug, Clone)]
pub struct SpeechItem {
    pub text: String,
    pub audio: AudioSegment,
}

/// One turn in the conversation transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub role: Role,
    pub name: String,
    pub content: String,
    pub timestamp_utc: f64,
    pub full_audio_path: Option<String>,
}

impl ConversationTurn {
    pub fn new(role: Role, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role, name: name.into(), content: content.into(), timestamp_utc: unix_timestamp(), full_audio_path: None }
    }
}

/// Current wall-clock time as a UTC Unix timestamp, used as the
/// token-ledger primary key.
pub fn unix_timestamp() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// A single accounted LLM call for the token ledger.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub timestamp_utc: f64,
    pub model: String,
    pub n_input_tokens: i64,
    pub n_output_tokens: i64,
    pub cost_input_tokens: f64,
    pub cost_output_tokens: f64,
}

/// Broadcast flag set when the user interrupts the assistant mid-reply.
///
/// Cloned into every worker rather than read through a shared god-object,
/// matching the cancellation-token shape called for by the interrupt design.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal(Arc<AtomicBool>);

impl InterruptSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Expose the underlying flag for components (e.g. the mixer) that
    /// need to poll it as a plain `Arc<AtomicBool>` rather than through
    /// this type's API.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

/// Broadcast flag ending the whole session.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal(Arc<AtomicBool>);

impl ExitSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_quantizes_to_i16() {
        let frame = AudioFrame::from_f32(&[0.0, 1.0, -1.0, 0.5], 16000);
        assert_eq!(frame.samples, vec![0, i16::MAX, -i16::MAX, i16::MAX / 2]);
    }

    #[test]
    fn audio_segment_extend_accumulates_duration() {
        let mut seg = AudioSegment::empty(16000);
        seg.extend(&AudioSegment::from_samples(vec![0; 8000], 16000));
        seg.extend(&AudioSegment::from_samples(vec![0; 8000], 16000));
        assert_eq!(seg.duration_seconds(), 1.0);
    }

    #[test]
    fn interrupt_signal_defaults_clear() {
        let sig = InterruptSignal::new();
        assert!(!sig.is_set());
        sig.set();
        assert!(sig.is_set());
        sig.clear();
        assert!(!sig.is_set());
    }
}
