//! LLM client module for interacting with language models.
//!
//! Uses RIG with Ollama provider for local LLM inference.

mod client;

pub use client::LlmClient;

use anyhow::Result;

use crate::model::{ReplyChunk, TokenUsage};

/// Contract for a conversational LLM backend: submit a prompt (with
/// history tracked internally) and get back the reply as tagged chunks,
/// plus the token usage for the call.
pub trait LlmStreamer {
    fn respond(&mut self, message: &str) -> impl std::future::Future<Output = Result<(Vec<ReplyChunk>, TokenUsage)>> + Send;

    /// Model identifier, used for token-ledger price lookups.
    fn model(&self) -> &str;
}
