//! LLM client using RIG with Ollama provider.

use anyhow::{Context, Result};
use rig::agent::Agent;
use rig::client::{CompletionClient, Nothing};
use rig::completion::Chat;
use rig::message::Message;
use rig::providers::ollama;
use serde_json::json;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::llm::LlmStreamer;
use crate::model::{ReplyChunk, TokenUsage};

/// LLM client for conversation with Ollama.
/// Uses RIG framework for simplified LLM interactions.
pub struct LlmClient {
    agent: Agent<ollama::CompletionModel>, // RIG agent with Ollama backend
    history: Vec<Message>,                 // Conversation history
    max_history: usize,                    // Maximum history length
    model: String,                         // Model identifier, for token pricing lookup
}

impl LlmClient {
    /// Create a new LLM client.
    ///
    /// # Errors
    /// Returns an error if failed to create Ollama client.
    pub fn new(config: &AppConfig) -> Result<Self> {
        info!("Connecting to Ollama at {}", config.ollama_url);
        info!("Using model: {}", config.ollama_model);

        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(&config.ollama_url)
            .build()
            .context("Failed to create Ollama client")?;

        // Reduce context window and token limits to save GPU memory on
        // resource-constrained devices running STT/TTS models alongside LLM
        let agent = client
            .agent(&config.ollama_model)
            .preamble(&config.system_prompt)
            .temperature(f64::from(config.temperature))
            .additional_params(json!({
                "num_ctx": 1024,
                "num_predict": 150
            }))
            .build();

        Ok(Self { agent, history: Vec::new(), max_history: config.max_history, model: config.ollama_model.clone() })
    }
}

impl LlmStreamer for LlmClient {
    /// Send a message and materialize the complete response as chunks.
    ///
    /// RIG's `Chat` trait against Ollama is not token-streaming, so this
    /// "stream" is produced eagerly in one call rather than lazily; downstream stages
    /// still consume it chunk by chunk and still check for an interrupt
    /// between chunks, preserving the same cancellation points a true
    /// streaming client would offer.
    async fn respond(&mut self, message: &str) -> Result<(Vec<ReplyChunk>, TokenUsage)> {
        debug!("User: {}", message);

        let response = self.agent.chat(message, self.history.clone()).await.context("LLM request failed")?;

        debug!("Assistant: {}", response);

        self.history.push(Message::user(message));
        self.history.push(Message::assistant(&response));
        while self.history.len() > self.max_history * 2 {
            self.history.remove(0);
            if !self.history.is_empty() {
                self.history.remove(0);
            }
        }

        let usage = TokenUsage {
            n_input_tokens: estimate_tokens(message),
            n_output_tokens: estimate_tokens(&response),
        };
        Ok((split_code_fences(&response), usage))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Whitespace-word token estimate, used when the underlying completion
/// client does not surface real usage counters (RIG's `Chat` trait does
/// not for the Ollama provider).
fn estimate_tokens(text: &str) -> i64 {
    text.split_whitespace().count() as i64
}

/// Split a response into alternating text/code chunks on fenced code
/// blocks (``` ... ```), so fenced code is never handed to the sentence
/// chunker or TTS.
fn split_code_fences(text: &str) -> Vec<ReplyChunk> {
    let mut chunks = Vec::new();
    let mut in_code = false;
    for part in text.split("```") {
        if part.is_empty() {
            in_code = !in_code;
            continue;
        }
        chunks.push(if in_code { ReplyChunk::code(part) } else { ReplyChunk::text(part) });
        in_code = !in_code;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ReplyChunkKind;

    #[test]
    fn split_code_fences_separates_prose_from_code() {
        let chunks = split_code_fences("Here you go:\n```\nlet x = 1;\n```\nDone.");
        assert_eq!(chunks[0].kind, ReplyChunkKind::Text);
        assert_eq!(chunks[1].kind, ReplyChunkKind::Code);
        assert!(chunks[1].content.contains("let x = 1;"));
        assert_eq!(chunks[2].kind, ReplyChunkKind::Text);
    }

    #[test]
    fn split_code_fences_handles_plain_text() {
        let chunks = split_code_fences("just prose, no code");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ReplyChunkKind::Text);
    }
}
