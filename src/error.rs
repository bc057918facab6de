//! Top-level error taxonomy for the voice dialog engine.
//!
//! Library code returns `Result<T, EngineError>`; the binary entry point
//! wraps these in `anyhow::Result` with added context.

use thiserror::Error;

/// Every failure mode the engine's components can surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio device unavailable: {0}")]
    AudioDeviceUnavailable(String),

    #[error("audio decode failed: {0}")]
    AudioDecode(String),

    #[error("speech-to-text transient failure: {0}")]
    SttTransient(String),

    #[error("speech-to-text failed: {0}")]
    SttFatal(String),

    #[error("text-to-speech transient failure: {0}")]
    TtsTransient(String),

    #[error("text-to-speech failed: {0}")]
    TtsFatal(String),

    #[error("LLM call transient failure: {0}")]
    LlmTransient(String),

    #[error("LLM call failed: {0}")]
    LlmFatal(String),

    #[error("failed to persist audio history: {0}")]
    HistoryPersist(String),

    #[error("failed to persist token ledger entry: {0}")]
    LedgerPersist(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
