use crate::errors::{ModelError, ModelResult};
use crate::model::{Flow, ModelHandle, SamplingOptions};
use crate::models::usage::TokenUsage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-request generation settings for the chat surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub temperature: f64,
    pub max_new_tokens: usize,
    pub stream: bool,
    pub system_message: String,
}

impl GenerationParameters {
    pub fn sampling(&self) -> SamplingOptions {
        SamplingOptions {
            max_new_tokens: self.max_new_tokens,
            do_sample: true,
            temperature: self.temperature,
            ..Default::default()
        }
    }
}

/// A finished chat reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub token_usage: TokenUsage,
}

/// Output of a raw prompt completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawGeneration {
    /// Only the newly generated text, trimmed
    pub response: String,
    /// Prompt and continuation decoded together
    pub generated_text: String,
}

/// Keep at most `max_len` ids, dropping from the front so the open assistant turn at the end
/// of the prompt survives.
pub fn truncate_input(mut ids: Vec<u32>, max_len: usize) -> Vec<u32> {
    if ids.len() > max_len {
        ids.drain(..ids.len() - max_len);
    }
    ids
}

/// The generated suffix of a full output sequence
pub fn new_tokens(output: &[u32], input_len: usize) -> &[u32] {
    &output[input_len.min(output.len())..]
}

/// Generate a complete reply for a chat prompt. Blocking.
pub fn complete(
    handle: &dyn ModelHandle,
    prompt: &str,
    options: &SamplingOptions,
    max_input_tokens: usize,
) -> ModelResult<Completion> {
    let input_ids = truncate_input(handle.encode(prompt)?, max_input_tokens);
    let output = handle.generate(&input_ids, options, &mut |_| Flow::Continue)?;
    let content = handle.decode(new_tokens(&output, input_ids.len()), true)?;

    let token_usage = TokenUsage::new(
        handle.encode(prompt)?.len(),
        handle.encode(&content)?.len(),
    );

    Ok(Completion {
        content,
        token_usage,
    })
}

/// Generate a continuation for a free-form prompt. Blocking.
pub fn generate_text(
    handle: &dyn ModelHandle,
    prompt: &str,
    options: &SamplingOptions,
) -> ModelResult<RawGeneration> {
    let input_ids = handle.encode(prompt)?;
    let output = handle.generate(&input_ids, options, &mut |_| Flow::Continue)?;

    Ok(RawGeneration {
        response: handle
            .decode(new_tokens(&output, input_ids.len()), true)?
            .trim()
            .to_string(),
        generated_text: handle.decode(&output, true)?,
    })
}

/// `complete` on a blocking worker thread
pub async fn complete_in_background(
    handle: Arc<dyn ModelHandle>,
    prompt: String,
    options: SamplingOptions,
    max_input_tokens: usize,
) -> ModelResult<Completion> {
    tokio::task::spawn_blocking(move || {
        complete(handle.as_ref(), &prompt, &options, max_input_tokens)
    })
    .await?
}

/// `generate_text` on a blocking worker thread
pub async fn generate_text_in_background(
    handle: Arc<dyn ModelHandle>,
    prompt: String,
    options: SamplingOptions,
) -> ModelResult<RawGeneration> {
    if prompt.is_empty() {
        return Err(ModelError::Generation("Prompt cannot be empty".to_string()));
    }
    tokio::task::spawn_blocking(move || generate_text(handle.as_ref(), &prompt, &options)).await?
}
