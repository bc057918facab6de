//! Voice activity detection and utterance segmentation.
//!
//! Frame-level speech/non-speech classification is delegated to a
//! [`FrameClassifier`] (the sherpa-rs Silero VAD model in production, a
//! plain RMS-energy threshold in tests). `VadSegmenter` itself only
//! implements the segmentation policy: an utterance begins on the first
//! speech frame seen after silence, and ends when a periodic check — run
//! every `inactivity_timeout_seconds` of audio — finds that the fraction
//! of speech frames in the trailing window has dropped below
//! `speech_likelihood_threshold`. This is a polling-window policy rather
//! than the edge-triggered "N consecutive silent frames" scheme more
//! common in Rust VAD implementations.

use std::collections::VecDeque;

use tracing::debug;

use crate::model::{AudioFrame, Utterance};

/// Per-frame speech/non-speech classifier.
pub trait FrameClassifier: Send {
    /// Returns `true` if `frame` is judged to contain speech.
    fn is_speech(&mut self, frame: &AudioFrame) -> bool;
}

/// A classifier based on RMS energy against a fixed threshold.
///
/// Used as the default when no neural VAD model is configured, and in
/// unit tests where loading an ONNX model is undesirable.
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    fn rms(frame: &AudioFrame) -> f32 {
        if frame.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = frame.samples.iter().map(|&s| (s as f64 / i16::MAX as f64).powi(2)).sum();
        (sum_sq / frame.samples.len() as f64).sqrt() as f32
    }
}

impl FrameClassifier for EnergyClassifier {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        Self::rms(frame) >= self.threshold
    }
}

/// Segments a stream of `AudioFrame`s into `Utterance`s using a periodic
/// sliding-window speech-fraction check.
pub struct VadSegmenter {
    classifier: Box<dyn FrameClassifier>,
    sample_rate: u32,
    /// How much audio (in frames) one "periodic check" interval spans.
    check_interval_frames: usize,
    /// How many frames make up the trailing window inspected at each check.
    window_frames: usize,
    speech_likelihood_threshold: f32,
    min_speech_duration_seconds: f64,

    window: VecDeque<bool>,
    frames_since_check: usize,
    in_utterance: bool,
    current: Vec<AudioFrame>,
}

impl VadSegmenter {
    pub fn new(
        classifier: Box<dyn FrameClassifier>,
        sample_rate: u32,
        frame_duration_ms: u32,
        inactivity_timeout_seconds: f64,
        speech_likelihood_threshold: f32,
        min_speech_duration_seconds: f64,
    ) -> Self {
        let frames_per_second = 1000.0 / frame_duration_ms as f64;
        let check_interval_frames = (inactivity_timeout_seconds * frames_per_second).max(1.0) as usize;
        Self {
            classifier,
            sample_rate,
            check_interval_frames,
            window_frames: check_interval_frames,
            speech_likelihood_threshold,
            min_speech_duration_seconds,
            window: VecDeque::with_capacity(check_interval_frames),
            frames_since_check: 0,
            in_utterance: false,
            current: Vec::new(),
        }
    }

    /// Feed one frame. Returns a completed `Utterance` if this frame closed one.
    pub fn accept_frame(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let speech = self.classifier.is_speech(&frame);

        if speech && !self.in_utterance {
            debug!("utterance started");
            self.in_utterance = true;
            self.window.clear();
            self.frames_since_check = 0;
        }

        if self.in_utterance {
            self.current.push(frame);
            self.window.push_back(speech);
            while self.window.len() > self.window_frames {
                self.window.pop_front();
            }
            self.frames_since_check += 1;

            if self.frames_since_check >= self.check_interval_frames {
                self.frames_since_check = 0;
                let likelihood = self.window.iter().filter(|&&s| s).count() as f32 / self.window.len().max(1) as f32;
                if likelihood < self.speech_likelihood_threshold {
                    return self.finish_utterance();
                }
            }
        }

        None
    }

    /// Force-close the current utterance, e.g. on session shutdown.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.in_utterance { self.finish_utterance() } else { None }
    }

    fn finish_utterance(&mut self) -> Option<Utterance> {
        self.in_utterance = false;
        let frames = std::mem::take(&mut self.current);
        self.window.clear();
        if frames.is_empty() {
            return None;
        }
        let audio = crate::model::AudioSegment::from_frames(&frames);
        if audio.duration_seconds() < self.min_speech_duration_seconds {
            debug!(duration = audio.duration_seconds(), "discarding short utterance");
            return None;
        }
        Some(Utterance { audio })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_frame(sample_rate: u32, len: usize) -> AudioFrame {
        AudioFrame::new(vec![0; len], sample_rate)
    }

    fn loud_frame(sample_rate: u32, len: usize) -> AudioFrame {
        AudioFrame::new(vec![i16::MAX / 2; len], sample_rate)
    }

    #[test]
    fn closes_utterance_once_window_falls_below_threshold() {
        let mut vad = VadSegmenter::new(Box::new(EnergyClassifier::new(0.1)), 16000, 20, 0.1, 0.5, 0.0);
        // frame_duration_ms=20 at 16kHz => 320 samples/frame, 5 frames/check interval.
        for _ in 0..5 {
            assert!(vad.accept_frame(loud_frame(16000, 320)).is_none());
        }
        // Now feed only silence; the window should fall below threshold and close.
        let mut closed = None;
        for _ in 0..5 {
            if let Some(u) = vad.accept_frame(silent_frame(16000, 320)) {
                closed = Some(u);
                break;
            }
        }
        assert!(closed.is_some());
    }

    #[test]
    fn short_utterance_is_discarded() {
        let mut vad = VadSegmenter::new(Box::new(EnergyClassifier::new(0.1)), 16000, 20, 0.05, 0.5, 1.0);
        assert!(vad.accept_frame(loud_frame(16000, 320)).is_none());
        let result = vad.flush();
        assert!(result.is_none());
    }
}
