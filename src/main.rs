//! Voice Assistant - A real-time voice dialog engine using local models.
//!
//! Speech recognition (Whisper), voice activity detection (Silero VAD),
//! text-to-speech (Kokoro) and LLM inference (Ollama via RIG) are wired
//! together by [`orchestrator::Orchestrator`], which drives one session's
//! full Idle/Listening/Transcribing/Answering/Interrupted/Terminating
//! cycle.

mod audio;
mod chunker;
mod config;
mod error;
mod history;
mod interrupt;
mod ledger;
mod llm;
mod model;
mod orchestrator;
mod stt;
mod tts;
mod vad;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use config::AppConfig;
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .unwrap();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🎤 voice assistant v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ configuration error: {}", e);
        error!("run 'scripts/setup.sh' to download required models.");
        std::process::exit(1);
    }

    info!("starting voice assistant...");
    config.log_config();

    let orchestrator = Orchestrator::new(config)?;
    let exit = orchestrator.exit_handle();

    tokio::spawn(async move {
        wait_for_shutdown().await;
        exit.set();
    });

    orchestrator.run().await?;

    info!("✅ voice assistant stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM, whichever arrives first.
async fn wait_for_shutdown() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 received SIGTERM, shutting down...");
        }
    }
}
