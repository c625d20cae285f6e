//! Adapter to the external text/speech generation capability.
//!
//! The rest of the actor treats generation as an opaque remote service
//! behind [`GenerationBackend`]: a lazy fragment stream for chat, byte
//! streams for speech, one-shot calls for titles and transcription. The
//! trait seam is what lets session-manager tests run against scripted
//! backends instead of the network.

mod openai;

pub use openai::OpenAiBackend;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;

use crate::store::MessageRole;

/// A model offered by the generation capability.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// One prior turn handed to the model as context.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

/// Lazy, potentially unbounded sequence of text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Lazy sequence of opaque audio byte fragments.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Remote generation capability: text, titles, speech in and out.
///
/// Implementations are stateless; cancellation is the caller's concern
/// (drop the stream and stop polling).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// List the text-generation models available upstream.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Stream a chat completion for the given history.
    async fn stream_text(&self, model: &str, turns: Vec<ChatTurn>) -> Result<TextStream>;

    /// Produce a short conversation title from the first exchange.
    async fn generate_title(&self, user_text: &str, assistant_text: &str) -> Result<String>;

    /// Transcribe spoken audio to text.
    async fn transcribe(&self, audio: Bytes) -> Result<String>;

    /// Synthesize speech for one text segment as a byte stream.
    async fn synthesize(&self, text: &str) -> Result<AudioStream>;
}
