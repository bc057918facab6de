//! Whisper-based speech-to-text via sherpa-rs.

use parking_lot::Mutex;
use sherpa_rs::whisper::{WhisperConfig, WhisperRecognizer};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::Result;
use crate::model::AudioSegment;
use crate::stt::SttAdapter;

/// Speech recognizer wrapping sherpa-rs's Whisper implementation.
pub struct Recognizer {
    whisper: Mutex<WhisperRecognizer>,
    sample_rate: u32,
    wake_word: Option<String>,
}

impl Recognizer {
    /// # Errors
    /// Returns an error if Whisper model files are missing or invalid.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let provider = config.effective_stt_provider();

        let encoder_path = config.whisper_encoder_path().to_string_lossy().to_string();
        let decoder_path = config.whisper_decoder_path().to_string_lossy().to_string();
        let tokens_path = config.whisper_tokens_path().to_string_lossy().to_string();

        info!("Whisper encoder path: {}", encoder_path);
        info!("Whisper decoder path: {}", decoder_path);
        info!("Whisper tokens path: {}", tokens_path);
        info!("Whisper provider: {}", provider.as_sherpa_provider());

        let stt_language = config.effective_stt_language().to_string();
        info!("STT language: {}", if stt_language.is_empty() { "auto" } else { &stt_language });

        let whisper_config = WhisperConfig {
            encoder: encoder_path,
            decoder: decoder_path,
            tokens: tokens_path,
            language: stt_language,
            provider: Some(provider.as_sherpa_provider().to_string()),
            num_threads: Some(config.stt_threads.try_into().unwrap_or(2)),
            debug: config.verbose,
            ..Default::default()
        };

        let whisper = WhisperRecognizer::new(whisper_config).map_err(|e| anyhow::anyhow!("Failed to initialize Whisper: {}", e))?;

        Ok(Self { whisper: Mutex::new(whisper), sample_rate: config.sample_rate, wake_word: config.wake_word.clone() })
    }
}

impl SttAdapter for Recognizer {
    fn transcribe(&self, segment: &AudioSegment) -> Result<Option<String>> {
        let samples = segment.to_f32();
        if samples.is_empty() {
            debug!("empty speech segment");
            return Ok(None);
        }

        debug!("transcribing {} samples", samples.len());

        let mut whisper = self.whisper.lock();
        let result = whisper.transcribe(self.sample_rate, &samples);
        drop(whisper);

        let text = result.text.trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }

        let Some(wake_word) = &self.wake_word else {
            info!("you: {}", text);
            return Ok(Some(text));
        };

        if !text.to_lowercase().contains(&wake_word.to_lowercase()) {
            debug!("wake word '{}' not detected in '{}', ignoring", wake_word, text);
            return Ok(None);
        }

        let cleaned = text
            .to_lowercase()
            .replace(&wake_word.to_lowercase(), "")
            .trim_start_matches(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
            .trim()
            .to_string();

        if cleaned.is_empty() {
            info!("wake word '{}' detected with no query", wake_word);
            return Ok(Some("Hello".to_string()));
        }

        info!("you (wake word detected): {}", cleaned);
        Ok(Some(cleaned))
    }
}

