//! OpenAI-compatible HTTP implementation of [`GenerationBackend`].
//!
//! Chat completions are consumed as SSE from `bytes_stream()` and parsed
//! incrementally; fragments are forwarded over an mpsc channel so the
//! caller sees a plain text stream.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::{AudioStream, ChatTurn, GenerationBackend, ModelInfo, TextStream};
use crate::config::GenAiConfig;

const FRAGMENT_BUFFER_SIZE: usize = 64;
const TITLE_MAX_CHARS: usize = 80;

/// HTTP client for an OpenAI-compatible API surface.
pub struct OpenAiBackend {
    client: reqwest::Client,
    config: GenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: GenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building HTTP client")?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.config.api_key)
    }

    async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(anyhow!("{} returned {}: {}", what, status, body))
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.url("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .context("requesting model list")?;
        let response = Self::check(response, "model list").await?;

        let listing: ModelListing = response.json().await.context("parsing model list")?;
        Ok(listing
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                description: m.owned_by.unwrap_or_default(),
                id: m.id,
            })
            .collect())
    }

    async fn stream_text(&self, model: &str, turns: Vec<ChatTurn>) -> Result<TextStream> {
        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|t| {
                serde_json::json!({
                    "role": t.role.to_string(),
                    "content": t.content,
                })
            })
            .collect();

        let response = self
            .post("chat/completions")
            .json(&serde_json::json!({
                "model": model,
                "messages": messages,
                "stream": true,
            }))
            .send()
            .await
            .context("starting chat completion stream")?;
        let response = Self::check(response, "chat completion").await?;

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER_SIZE);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for payload in parser.feed(&bytes) {
                            if payload == "[DONE]" {
                                return;
                            }
                            if let Some(text) = delta_content(&payload)
                                && !text.is_empty()
                                && tx.send(Ok(text)).await.is_err()
                            {
                                // Receiver dropped: stream was cancelled.
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(anyhow!("reading completion stream: {}", e))).await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn generate_title(&self, user_text: &str, assistant_text: &str) -> Result<String> {
        let response = self
            .post("chat/completions")
            .json(&serde_json::json!({
                "model": self.config.title_model,
                "messages": [
                    {
                        "role": "system",
                        "content": "Write a short title (at most six words) for the \
                                    conversation below. Reply with the title only, \
                                    no quotes.",
                    },
                    {
                        "role": "user",
                        "content": format!("User: {}\n\nAssistant: {}", user_text, assistant_text),
                    },
                ],
            }))
            .send()
            .await
            .context("requesting title completion")?;
        let response = Self::check(response, "title completion").await?;

        let completion: ChatCompletion = response.json().await.context("parsing title")?;
        let raw = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("title completion had no content"))?;

        let title = clean_title(&raw);
        if title.is_empty() {
            return Err(anyhow!("title completion was empty"));
        }
        debug!(title = %title, "generated conversation title");
        Ok(title)
    }

    async fn transcribe(&self, audio: Bytes) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .text("model", self.config.stt_model.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec()).file_name("audio.webm"),
            );

        let response = self
            .post("audio/transcriptions")
            .multipart(form)
            .send()
            .await
            .context("requesting transcription")?;
        let response = Self::check(response, "transcription").await?;

        let transcription: Transcription =
            response.json().await.context("parsing transcription")?;
        Ok(transcription.text)
    }

    async fn synthesize(&self, text: &str) -> Result<AudioStream> {
        let response = self
            .post("audio/speech")
            .json(&serde_json::json!({
                "model": self.config.tts_model,
                "voice": self.config.tts_voice,
                "input": text,
            }))
            .send()
            .await
            .context("requesting speech synthesis")?;
        let response = Self::check(response, "speech synthesis").await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| anyhow!("reading speech stream: {}", e)));
        Ok(Box::pin(stream))
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct ModelListing {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: String,
}

// ============================================================================
// SSE parsing
// ============================================================================

/// Incremental parser for `text/event-stream` bodies.
///
/// Network chunks land on arbitrary byte boundaries, including inside a
/// multi-byte UTF-8 character, so the buffer holds raw bytes and only
/// complete events are decoded. Returns the `data:` payload of each
/// completed event.
#[derive(Debug, Default)]
struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        // Carriage returns carry no meaning here; dropping them makes
        // LF and CRLF framing look the same.
        self.buf.extend(chunk.iter().filter(|&&b| b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let event: Vec<u8> = self.buf.drain(..pos + 2).collect();
            let event = String::from_utf8_lossy(&event);
            for line in event.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    payloads.push(data.trim_start().to_string());
                }
            }
        }
        payloads
    }
}

/// Pull the delta text out of one streamed completion payload.
fn delta_content(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value["choices"][0]["delta"]["content"]
        .as_str()
        .map(|s| s.to_string())
}

/// Normalize a model-produced title: first line, no wrapping quotes,
/// bounded length.
fn clean_title(raw: &str) -> String {
    let first_line = raw.trim().lines().next().unwrap_or_default();
    let trimmed = first_line.trim().trim_matches(['"', '\'']).trim();
    trimmed.chars().take(TITLE_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_parser_handles_split_events() {
        let mut parser = SseParser::default();

        assert!(parser.feed(b"data: {\"a\":").is_empty());
        let payloads = parser.feed(b"1}\n\ndata: [DO");
        assert_eq!(payloads, ["{\"a\":1}"]);

        let payloads = parser.feed(b"NE]\n\n");
        assert_eq!(payloads, ["[DONE]"]);
    }

    #[test]
    fn sse_parser_reassembles_utf8_split_across_chunks() {
        let mut parser = SseParser::default();

        // "café" with the é's two bytes landing in different chunks.
        assert!(parser.feed(b"data: caf\xc3").is_empty());
        assert_eq!(parser.feed(b"\xa9\n\n"), ["caf\u{e9}"]);
    }

    #[test]
    fn sse_parser_ignores_comments_and_crlf() {
        let mut parser = SseParser::default();
        let payloads = parser.feed(b": keepalive\r\n\r\ndata: x\r\n\r\n");
        assert_eq!(payloads, ["x"]);
    }

    #[test]
    fn delta_content_extracts_streamed_text() {
        let payload =
            r#"{"choices":[{"delta":{"content":"Hel"},"index":0,"finish_reason":null}]}"#;
        assert_eq!(delta_content(payload).as_deref(), Some("Hel"));

        let finish = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(delta_content(finish).is_none());

        assert!(delta_content("not json").is_none());
    }

    #[test]
    fn clean_title_strips_quotes_and_extra_lines() {
        assert_eq!(clean_title("\"Trip to Lisbon\"\n"), "Trip to Lisbon");
        assert_eq!(clean_title("  Plans\nmore text"), "Plans");
        assert_eq!(clean_title(""), "");
    }
}
