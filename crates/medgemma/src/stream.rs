//! The producing half of the streaming relay.
//!
//! Generation runs on a blocking worker and pushes decoded text into a bounded channel. The
//! receiver going away is the disconnect signal: the producer checks for it before every step
//! and stops quietly.
use crate::errors::{ModelError, ModelResult};
use crate::generation::truncate_input;
use crate::model::{Flow, ModelHandle, SamplingOptions};
use crate::models::usage::TokenUsage;
use crate::prompt::TURN_END;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One item on the relay queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Fragment { content: String },
    /// Terminal record; nothing follows it
    TokenUsage(TokenUsage),
}

impl StreamChunk {
    pub fn fragment<S: Into<String>>(content: S) -> Self {
        StreamChunk::Fragment {
            content: content.into(),
        }
    }
}

/// Decoders render the bytes of an unfinished UTF-8 sequence as replacement characters, which
/// get replaced once the sequence completes.
const INCOMPLETE: char = char::REPLACEMENT_CHARACTER;

/// The part of `text` not sent yet, or None when `text` adds nothing to what was sent.
fn unsent<'a>(text: &'a str, sent: &str) -> Option<&'a str> {
    text.strip_prefix(sent).filter(|delta| !delta.is_empty())
}

/// Generate `prompt` token by token, sending each new piece of text to `tx`, then the usage
/// record. Blocking.
///
/// Text is produced by decoding everything generated so far and sending only what extends the
/// text already sent, which keeps the spacing that per-token decoding loses. Text ending in a
/// replacement character is held back until the character completes; whatever is still held
/// when generation ends is sent before the usage record.
pub fn produce(
    handle: &dyn ModelHandle,
    prompt: &str,
    options: &SamplingOptions,
    max_input_tokens: usize,
    tx: &mpsc::Sender<StreamChunk>,
) -> ModelResult<()> {
    let input_ids = truncate_input(handle.encode(prompt)?, max_input_tokens);

    let mut generated: Vec<u32> = Vec::new();
    let mut sent = String::new();
    let mut failure: Option<ModelError> = None;

    if tx.is_closed() {
        return Err(ModelError::ClientDisconnected);
    }

    handle.generate(&input_ids, options, &mut |token| {
        if tx.is_closed() {
            return Flow::Stop;
        }

        let raw = match handle.decode(&[token], false) {
            Ok(raw) => raw,
            Err(e) => {
                failure = Some(e);
                return Flow::Stop;
            }
        };
        if raw.is_empty() || raw.contains(TURN_END) {
            return Flow::Stop;
        }
        generated.push(token);

        let text = match handle.decode(&generated, true) {
            Ok(text) => text,
            Err(e) => {
                failure = Some(e);
                return Flow::Stop;
            }
        };
        if text.ends_with(INCOMPLETE) {
            return Flow::Continue;
        }
        if let Some(delta) = unsent(&text, &sent) {
            if tx.blocking_send(StreamChunk::fragment(delta)).is_err() {
                return Flow::Stop;
            }
            sent = text;
        }
        Flow::Continue
    })?;

    if let Some(e) = failure {
        return Err(e);
    }
    if tx.is_closed() {
        return Err(ModelError::ClientDisconnected);
    }

    let text = handle.decode(&generated, true)?;
    match unsent(&text, &sent) {
        Some(rest) => tx
            .blocking_send(StreamChunk::fragment(rest))
            .map_err(|_| ModelError::ClientDisconnected)?,
        None if text != sent => {
            tracing::warn!("Decoded reply diverged from the streamed text, tail not sent");
        }
        None => {}
    }

    let usage = TokenUsage::new(handle.encode(prompt)?.len(), generated.len());
    tx.blocking_send(StreamChunk::TokenUsage(usage))
        .map_err(|_| ModelError::ClientDisconnected)
}

/// Run `produce` on a blocking worker. Failures are logged; the channel closing without a
/// usage record is how the consumer learns about them.
pub fn spawn_producer(
    handle: Arc<dyn ModelHandle>,
    prompt: String,
    options: SamplingOptions,
    max_input_tokens: usize,
    tx: mpsc::Sender<StreamChunk>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        match produce(handle.as_ref(), &prompt, &options, max_input_tokens, &tx) {
            Ok(()) => {}
            Err(ModelError::ClientDisconnected) => {
                tracing::debug!("Client disconnected, stopping generation");
            }
            Err(e) => {
                tracing::error!("Error in MedGemma streaming: {}", e);
            }
        }
    })
}
