//! Adapts sherpa-rs's Silero VAD model to the [`crate::vad::FrameClassifier`]
//! contract, so its neural speech/non-speech judgement can be combined
//! with the periodic-window segmentation policy in [`crate::vad`].

use sherpa_rs::silero_vad::{SileroVad, SileroVadConfig};

use crate::config::AppConfig;
use crate::model::AudioFrame;
use crate::vad::FrameClassifier;

/// Buffer size in seconds for the underlying Silero ring buffer; only its
/// per-frame `is_speech` judgement is used here, not its own segmenting.
const VAD_BUFFER_SIZE_SECONDS: f32 = 5.0;
const MIN_SPEECH_DURATION: f32 = 0.1;
const MAX_SPEECH_DURATION: f32 = 30.0;
const VAD_WINDOW_SIZE: i32 = 512;

pub struct SherpaFrameClassifier {
    vad: SileroVad,
}

impl SherpaFrameClassifier {
    /// # Errors
    /// Returns an error if the Silero VAD model cannot be initialized.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let provider = config.effective_stt_provider();
        let vad_config = SileroVadConfig {
            model: config.vad_model_path().to_string_lossy().to_string(),
            threshold: config.vad_threshold,
            sample_rate: config.sample_rate,
            min_silence_duration: config.vad_silence_duration,
            min_speech_duration: MIN_SPEECH_DURATION,
            max_speech_duration: MAX_SPEECH_DURATION,
            window_size: VAD_WINDOW_SIZE,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(config.vad_threads.try_into().unwrap_or(1)),
            debug: config.verbose,
        };
        let vad = SileroVad::new(vad_config, VAD_BUFFER_SIZE_SECONDS).map_err(|e| anyhow::anyhow!("failed to initialize Silero VAD: {}", e))?;
        Ok(Self { vad })
    }
}

impl FrameClassifier for SherpaFrameClassifier {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        let samples: Vec<f32> = frame.samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
        self.vad.accept_waveform(samples);
        // Drain any segments the model queues internally; this classifier
        // only consumes its per-frame speech judgement, leaving
        // segmentation policy to `VadSegmenter`.
        while !self.vad.is_empty() {
            self.vad.pop();
        }
        self.vad.is_speech()
    }
}
