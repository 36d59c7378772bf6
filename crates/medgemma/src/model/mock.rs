use super::{Flow, ModelHandle, ParameterCount, SamplingOptions};
use crate::errors::{ModelError, ModelResult};
use crate::prompt::TURN_END;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Id used for the end-of-turn token. Sits just past the last unicode scalar value.
pub const MOCK_END_OF_TURN: u32 = 0x11_0000;

/// A character level model that replies with a fixed script, for tests and local wiring.
///
/// Every character is its own token (the id is the code point), so encode/decode round trips
/// are exact and token counts equal character counts. `byte_level` switches to one token per
/// UTF-8 byte, decoded the way byte-fallback tokenizers do it.
pub struct MockModel {
    reply: Vec<u32>,
    byte_level: bool,
    failure: Option<String>,
    token_delay: Option<Duration>,
    generate_calls: AtomicUsize,
}

impl MockModel {
    pub fn new(reply: &str) -> Self {
        Self::from_tokens(reply.chars().map(|c| c as u32).collect())
    }

    /// Reply with raw token ids. `MOCK_END_OF_TURN` is passed through like any other token.
    pub fn from_tokens(reply: Vec<u32>) -> Self {
        Self {
            reply,
            byte_level: false,
            failure: None,
            token_delay: None,
            generate_calls: AtomicUsize::new(0),
        }
    }

    /// Every UTF-8 byte is a token. Decoding an unfinished multi-byte sequence yields
    /// replacement characters.
    pub fn byte_level(reply: &str) -> Self {
        Self {
            byte_level: true,
            ..Self::from_tokens(reply.bytes().map(u32::from).collect())
        }
    }

    fn decode_bytes(ids: &[u32], skip_special_tokens: bool) -> ModelResult<String> {
        let mut text = String::new();
        let mut bytes = Vec::new();
        for &id in ids {
            if id == MOCK_END_OF_TURN {
                text.push_str(&String::from_utf8_lossy(&bytes));
                bytes.clear();
                if !skip_special_tokens {
                    text.push_str(TURN_END);
                }
                continue;
            }
            let byte = u8::try_from(id)
                .map_err(|_| ModelError::Generation(format!("Unknown token id {}", id)))?;
            bytes.push(byte);
        }
        text.push_str(&String::from_utf8_lossy(&bytes));
        Ok(text)
    }

    /// A model whose every generation fails with the given message
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new("")
        }
    }

    /// Sleep between tokens, to exercise timeouts and disconnects
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

impl ModelHandle for MockModel {
    fn model_name(&self) -> &str {
        "mock/medgemma"
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    fn parameter_count(&self) -> ParameterCount {
        ParameterCount {
            parameters: 1_000,
            trainable_parameters: 0,
        }
    }

    fn encode(&self, text: &str) -> ModelResult<Vec<u32>> {
        if self.byte_level {
            return Ok(text.bytes().map(u32::from).collect());
        }
        Ok(text.chars().map(|c| c as u32).collect())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> ModelResult<String> {
        if self.byte_level {
            return Self::decode_bytes(ids, skip_special_tokens);
        }
        let mut text = String::new();
        for &id in ids {
            if id == MOCK_END_OF_TURN {
                if !skip_special_tokens {
                    text.push_str(TURN_END);
                }
                continue;
            }
            let c = char::from_u32(id)
                .ok_or_else(|| ModelError::Generation(format!("Unknown token id {}", id)))?;
            text.push(c);
        }
        Ok(text)
    }

    fn generate(
        &self,
        input_ids: &[u32],
        options: &SamplingOptions,
        on_token: &mut dyn FnMut(u32) -> Flow,
    ) -> ModelResult<Vec<u32>> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(ModelError::Generation(message.clone()));
        }

        let mut tokens = input_ids.to_vec();
        for &id in self.reply.iter().take(options.max_new_tokens) {
            if let Some(delay) = self.token_delay {
                std::thread::sleep(delay);
            }
            tokens.push(id);
            if on_token(id) == Flow::Stop {
                break;
            }
        }
        Ok(tokens)
    }
}
