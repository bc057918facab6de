//! Top-level state machine (C9) wiring capture, VAD, STT, the LLM
//! streamer, sentence chunking, TTS, playback, the interrupt watcher,
//! audio history and the token ledger into one session.
//!
//! Drives bounded inter-stage channels and `Arc<AtomicBool>` broadcast
//! flags through the full Idle/Listening/Transcribing/Answering/
//! Interrupted/Terminating cycle named in the component design.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, broadcast};
use tracing::{error, info, warn};

use crate::audio::{Capturer, Player};
use crate::chunker::SentenceChunker;
use crate::config::{AppConfig, InterruptMode};
use crate::history::{AudioHistory, ConversationHistory};
use crate::interrupt::{InterruptWatcher, starts_with_any_expression};
use crate::ledger::TokenLedger;
use crate::llm::{LlmClient, LlmStreamer};
use crate::model::{AudioFrame, AudioSegment, ConversationTurn, ExitSignal, InterruptSignal, ReplyChunkKind, Role, Utterance};
use crate::stt::{Recognizer, SherpaFrameClassifier, SttAdapter};
use crate::tts::{Synthesizer, TtsAdapter};
use crate::vad::{FrameClassifier, VadSegmenter};

/// Fan-out capacity for the utterance broadcast channel: the main loop
/// and the interrupt watcher each hold their own subscription.
const UTTERANCE_CHANNEL_CAPACITY: usize = 8;

/// Capped exponential backoff for reopening the capture device, per the
/// component design's "retry with exponential backoff, else surface
/// `AudioDeviceUnavailable`" requirement.
const MAX_CAPTURE_START_ATTEMPTS: u32 = 5;

/// Feeds raw capture samples through fixed-size framing and the VAD
/// segmenter, broadcasting completed utterances to every subscriber.
///
/// Lives behind an `Arc` so the `Fn` capture callback (which only gets
/// a shared reference) can still drive the segmenter's mutable state
/// from inside `Capturer::new`'s closure.
struct CaptureVad {
    sample_rate: u32,
    block_size: usize,
    leftover: SyncMutex<Vec<f32>>,
    segmenter: SyncMutex<VadSegmenter>,
    utterance_tx: broadcast::Sender<Utterance>,
}

impl CaptureVad {
    fn new(
        sample_rate: u32,
        frame_duration_ms: u32,
        classifier: Box<dyn FrameClassifier>,
        inactivity_timeout_seconds: f64,
        speech_likelihood_threshold: f32,
        min_speech_duration_seconds: f64,
        utterance_tx: broadcast::Sender<Utterance>,
    ) -> Self {
        let block_size = ((sample_rate as u64 * frame_duration_ms as u64 / 1000) as usize).max(1);
        Self {
            sample_rate,
            block_size,
            leftover: SyncMutex::new(Vec::with_capacity(block_size)),
            segmenter: SyncMutex::new(VadSegmenter::new(
                classifier,
                sample_rate,
                frame_duration_ms,
                inactivity_timeout_seconds,
                speech_likelihood_threshold,
                min_speech_duration_seconds,
            )),
            utterance_tx,
        }
    }

    /// Called from the capture callback thread with one device buffer
    /// of resampled mono f32 audio; frames it into fixed VAD blocks and
    /// publishes any utterance the segmenter closes as a result.
    fn accept(&self, samples: &[f32]) {
        let mut leftover = self.leftover.lock();
        leftover.extend_from_slice(samples);

        while leftover.len() >= self.block_size {
            let block: Vec<f32> = leftover.drain(..self.block_size).collect();
            let frame = AudioFrame::from_f32(&block, self.sample_rate);
            let utterance = self.segmenter.lock().accept_frame(frame);
            if let Some(utterance) = utterance {
                // No receivers (e.g. during shutdown) is not an error here.
                let _ = self.utterance_tx.send(utterance);
            }
        }
    }
}

/// Shared state the background interrupt watcher inspects: whether a
/// reply is currently being spoken, and the assistant's text so far.
struct AnswerState {
    answering: AtomicBool,
    assistant_text: SyncMutex<String>,
}

/// The voice dialog engine for one session: owns every adapter and
/// drives the Idle/Listening/Transcribing/Answering/Interrupted/
/// Terminating state machine from the component design.
pub struct Orchestrator {
    config: AppConfig,
    recognizer: Arc<Recognizer>,
    synthesizer: SyncMutex<Synthesizer>,
    llm: AsyncMutex<LlmClient>,
    player: Arc<Player>,
    capturer: Capturer,
    utterance_rx: broadcast::Receiver<Utterance>,
    interrupt: InterruptSignal,
    exit: ExitSignal,
    answer_state: Arc<AnswerState>,
    watcher_task: Option<tokio::task::JoinHandle<()>>,
    history: ConversationHistory,
    audio_history: AudioHistory,
    ledger: TokenLedger,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Result<Self> {
        let recognizer = Arc::new(Recognizer::new(&config).context("failed to initialize speech recognizer")?);
        let synthesizer = Synthesizer::new(&config).context("failed to initialize speech synthesizer")?;
        let synth_sample_rate = synthesizer.sample_rate();
        let llm = LlmClient::new(&config).context("failed to initialize LLM client")?;

        let interrupt = InterruptSignal::new();
        let player = Player::new(synth_sample_rate, Some(interrupt.as_atomic())).context("failed to initialize audio player")?;
        let player = Arc::new(player);

        let (utterance_tx, utterance_rx) = broadcast::channel(UTTERANCE_CHANNEL_CAPACITY);

        let classifier: Box<dyn FrameClassifier> = Box::new(SherpaFrameClassifier::new(&config).context("failed to initialize VAD classifier")?);
        let capture_vad = Arc::new(CaptureVad::new(
            config.sample_rate,
            config.frame_duration_ms,
            classifier,
            config.inactivity_timeout_seconds,
            config.speech_likelihood_threshold,
            config.min_speech_duration_seconds,
            utterance_tx.clone(),
        ));

        let capture_vad_cb = capture_vad.clone();
        let capturer = Capturer::new(config.sample_rate, move |samples: &[f32]| {
            capture_vad_cb.accept(samples);
        })
        .context("failed to initialize audio capture")?;

        let history = ConversationHistory::new(config.max_transcript_turns);
        let audio_history = AudioHistory::new(config.audio_cache_dir.clone(), config.min_speech_duration_seconds, synth_sample_rate);
        let ledger = TokenLedger::open(&config.token_usage_db_path).context("failed to open token ledger")?;

        let answer_state = Arc::new(AnswerState { answering: AtomicBool::new(false), assistant_text: SyncMutex::new(String::new()) });

        let exit = ExitSignal::new();

        let watcher_task = if config.interrupt_mode == InterruptMode::Always {
            Some(spawn_interrupt_watcher(
                utterance_tx.subscribe(),
                recognizer.clone(),
                Arc::new(InterruptWatcher::new(config.cancel_expressions.clone(), config.exit_expressions.clone())),
                interrupt.clone(),
                exit.clone(),
                answer_state.clone(),
            ))
        } else {
            None
        };

        Ok(Self {
            config,
            recognizer,
            synthesizer: SyncMutex::new(synthesizer),
            llm: AsyncMutex::new(llm),
            player,
            capturer,
            utterance_rx,
            interrupt,
            exit,
            answer_state,
            watcher_task,
            history,
            audio_history,
            ledger,
        })
    }

    /// A clone of the session's `ExitSignal`, for an external caller (e.g.
    /// a Ctrl+C/SIGTERM handler) to request a clean shutdown.
    pub fn exit_handle(&self) -> ExitSignal {
        self.exit.clone()
    }

    /// Run the session until `ExitSignal` is set or the capture pipeline
    /// closes.
    pub async fn run(mut self) -> Result<()> {
        start_capture_with_retry(&mut self.capturer).await?;

        if !self.config.skip_initial_greeting {
            self.greet();
        }

        while !self.exit.is_set() {
            let recv_result = tokio::select! {
                result = self.utterance_rx.recv() => result,
                _ = tokio::time::sleep(Duration::from_millis(250)) => continue,
            };

            let utterance = match recv_result {
                Ok(utterance) => utterance,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "utterance receiver lagged, dropping skipped utterances");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("capture pipeline closed, ending session");
                    break;
                }
            };

            if let Err(err) = self.handle_utterance(utterance).await {
                error!(%err, "turn failed, returning to listening");
            }
        }

        self.terminate();
        Ok(())
    }

    /// Idle entry: speak the configured greeting unless skipped or the
    /// engine is running text-only.
    fn greet(&self) {
        if self.config.reply_only_as_text {
            info!(text = %self.config.greeting, "assistant (text-only)");
            return;
        }
        let item = self.synthesizer.lock().synthesize(&self.config.greeting);
        match item {
            Ok(item) => {
                self.player.play(&item.audio.to_f32());
            }
            Err(err) => warn!(%err, "failed to synthesize initial greeting"),
        }
    }

    /// Transcribing state: STT the utterance, then route to Terminating
    /// (exit phrase), back to Listening (empty transcript), or Answering.
    async fn handle_utterance(&mut self, utterance: Utterance) -> Result<()> {
        let text = match self.recognizer.transcribe(&utterance.audio) {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(()),
            Err(err) => {
                warn!(%err, "speech-to-text failed, discarding utterance");
                return Ok(());
            }
        };

        info!("🧠 processing: \"{}\"", text);

        if starts_with_any_expression(&self.config.exit_expressions, &text) {
            info!(text = %text, "exit phrase detected");
            self.exit.set();
            return Ok(());
        }

        self.history.push(ConversationTurn::new(Role::User, "user", text.clone()));
        self.answer(&text).await
    }

    /// Answering state: stream the (eagerly materialized) LLM reply
    /// through the chunker, TTS and playback, watching for a mid-reply
    /// interrupt via the background watcher task.
    async fn answer(&mut self, prompt: &str) -> Result<()> {
        self.interrupt.clear();

        let model = self.llm.lock().await.model().to_string();
        let reply = self.llm.lock().await.respond(prompt).await;

        let (chunks, usage) = match reply {
            Ok(result) => result,
            Err(err) => {
                error!(%err, "❌ LLM call failed");
                return Ok(());
            }
        };

        if let Err(err) = self.ledger.insert(&model, usage.n_input_tokens, usage.n_output_tokens) {
            warn!(%err, "failed to persist token usage");
        }

        self.answer_state.assistant_text.lock().clear();
        self.answer_state.answering.store(true, Ordering::SeqCst);

        let mut chunker = SentenceChunker::new();
        let mut interrupted = false;

        'chunks: for chunk in chunks {
            if self.interrupt.is_set() {
                interrupted = true;
                break;
            }
            if chunk.kind == ReplyChunkKind::Code {
                continue; // P2: code chunks never reach the chunker or TTS
            }

            self.answer_state.assistant_text.lock().push_str(&chunk.content);
            for sentence in chunker.push(&chunk.content) {
                if self.interrupt.is_set() {
                    interrupted = true;
                    break 'chunks;
                }
                self.speak_sentence(&sentence).await;
            }
        }

        if !interrupted
            && !self.interrupt.is_set()
            && let Some(sentence) = chunker.finish()
        {
            self.speak_sentence(&sentence).await;
        }

        self.answer_state.answering.store(false, Ordering::SeqCst);

        let final_text = self.answer_state.assistant_text.lock().clone();
        info!("🤖 assistant: {}", final_text);
        self.history.push(ConversationTurn::new(Role::Assistant, "assistant", final_text));

        if self.exit.is_set() {
            return Ok(());
        }

        if self.interrupt.is_set() {
            self.handle_interrupt();
        } else {
            self.finish_reply();
        }

        Ok(())
    }

    /// Render and play one sentence, appending its audio to the
    /// in-progress reply buffer for `AudioHistory` unless the engine is
    /// configured for text-only replies. Checked right before this is
    /// the "before every tts_conversion_queue.put" interrupt tie-break
    /// point named in the component design.
    async fn speak_sentence(&mut self, sentence: &str) {
        if self.config.reply_only_as_text || self.interrupt.is_set() {
            return;
        }

        let item = self.synthesizer.lock().synthesize(sentence);
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                warn!(%err, sentence = %sentence, "text-to-speech failed, skipping sentence");
                return;
            }
        };

        self.audio_history.push_chunk(&item.audio);

        if self.config.interrupt_mode == InterruptMode::Wait {
            self.capturer.running_flag().store(false, Ordering::SeqCst);
        }

        info!("🔊 playing sentence ({} samples)", item.audio.samples().len());
        if !self.player.play(&item.audio.to_f32()) {
            info!("⏸️  playback interrupted by speech");
            self.interrupt.set();
        }

        if self.config.interrupt_mode == InterruptMode::Wait {
            tokio::time::sleep(Duration::from_millis(self.config.post_playback_delay_ms)).await;
            self.capturer.running_flag().store(true, Ordering::SeqCst);
        }
    }

    /// Interrupted state: stop playback, discard the in-flight reply
    /// audio, drain the cancel utterance (and anything else queued up
    /// behind it) so it isn't replayed as the next turn's prompt, signal
    /// a short cancel chime, then clear the flag so the next turn starts
    /// clean.
    fn handle_interrupt(&mut self) {
        info!("🗑️  interrupt detected, discarding in-flight reply audio");
        self.player.clear();
        self.audio_history.discard();
        let mut drained = 0;
        while self.utterance_rx.try_recv().is_ok() {
            drained += 1;
        }
        if drained > 0 {
            info!("🗑️  discarded {} queued utterance(s)", drained);
        }
        self.interrupt.clear();

        if !self.config.reply_only_as_text {
            let sample_rate = self.synthesizer.lock().sample_rate();
            self.player.play(&cancel_chime(sample_rate).to_f32());
        }
    }

    /// Normal end of a reply: flush the merged reply audio to
    /// `AudioHistory`, attaching its path to the transcript if it
    /// cleared the minimum-duration bar.
    fn finish_reply(&mut self) {
        match self.audio_history.finish() {
            Ok(Some(path)) => self.history.attach_audio_to_last_assistant_turn(path),
            Ok(None) => {}
            Err(err) => warn!(%err, "failed to persist reply audio"),
        }
    }

    /// Terminating state: stop the background watcher, close the audio
    /// device, and log a final token-usage summary.
    fn terminate(&mut self) {
        info!("terminating session");
        if let Some(handle) = self.watcher_task.take() {
            handle.abort();
        }
        self.capturer.shutdown();
        match self.ledger.balance_report() {
            Ok(report) => info!("session token usage:\n{report}"),
            Err(err) => warn!(%err, "failed to render token usage report"),
        }
    }
}

/// Generate a short fading tone played back when a reply is cancelled,
/// so the user gets audible confirmation the interrupt took effect.
fn cancel_chime(sample_rate: u32) -> AudioSegment {
    const FREQUENCY_HZ: f32 = 880.0;
    const DURATION_SECONDS: f32 = 0.12;
    const AMPLITUDE: f32 = 0.3;

    let n = ((sample_rate as f32) * DURATION_SECONDS) as usize;
    let samples: Vec<i16> = (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = 1.0 - (i as f32 / n.max(1) as f32);
            let value = (t * FREQUENCY_HZ * TAU).sin() * envelope * AMPLITUDE;
            (value * i16::MAX as f32) as i16
        })
        .collect();
    AudioSegment::from_samples(samples, sample_rate)
}

/// Retry opening the capture device with capped exponential backoff,
/// surfacing `AudioDeviceUnavailable` (as an `anyhow` error, at the
/// binary boundary) once attempts are exhausted.
async fn start_capture_with_retry(capturer: &mut Capturer) -> Result<()> {
    let mut delay = Duration::from_millis(200);
    for attempt in 1..=MAX_CAPTURE_START_ATTEMPTS {
        match capturer.start() {
            Ok(()) => return Ok(()),
            Err(err) if attempt < MAX_CAPTURE_START_ATTEMPTS => {
                warn!(%err, attempt, "audio device unavailable, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err).context("audio device unavailable, giving up after retries"),
        }
    }
    unreachable!("loop either returns Ok or Err on its final attempt")
}

/// While a reply is being spoken (`InterruptMode::Always` only — in
/// `Wait` mode the mic is paused during playback), transcribe any
/// utterance the capture/VAD pipeline emits and check it against the
/// assistant's text so far, setting `InterruptSignal`/`ExitSignal` as
/// the watcher determines. Runs for the lifetime of the session rather
/// than being spawned per-turn, since a `broadcast::Receiver` can be
/// held independently of the orchestrator's own subscription.
fn spawn_interrupt_watcher(
    mut utterance_rx: broadcast::Receiver<Utterance>,
    recognizer: Arc<Recognizer>,
    watcher: Arc<InterruptWatcher>,
    interrupt: InterruptSignal,
    exit: ExitSignal,
    answer_state: Arc<AnswerState>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let utterance = match utterance_rx.recv().await {
                Ok(u) => u,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            };

            if !answer_state.answering.load(Ordering::SeqCst) {
                continue;
            }

            let recorded_text = match recognizer.transcribe(&utterance.audio) {
                Ok(Some(text)) => text,
                _ => continue,
            };

            let assistant_text = answer_state.assistant_text.lock().clone();
            watcher.check(&assistant_text, &recorded_text, &interrupt, &exit);
        }
    })
}
