//! The model handle: an opaque, loaded inference capability.
//!
//! Everything heavy (tokenization, attention, sampling) happens behind this trait. All methods
//! are blocking and are expected to run on a blocking worker thread.
pub mod gemma;
pub mod mock;

use crate::errors::ModelResult;
use serde::{Deserialize, Serialize};

/// Sampling configuration for a single generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            do_sample: true,
            temperature: 0.7,
            top_p: None,
            seed: 299792458,
        }
    }
}

/// Parameter counts reported by `/model_info`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterCount {
    pub parameters: u64,
    pub trainable_parameters: u64,
}

/// Whether generation should keep going after a token has been produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub trait ModelHandle: Send + Sync {
    /// Name of the model as published in the registry
    fn model_name(&self) -> &str;

    /// Human readable device the weights live on ("cpu", "cuda")
    fn device(&self) -> String;

    fn parameter_count(&self) -> ParameterCount;

    /// Tokenize text, adding the special tokens the model expects at the start of a sequence
    fn encode(&self, text: &str) -> ModelResult<Vec<u32>>;

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> ModelResult<String>;

    /// Autoregressively extend `input_ids`.
    ///
    /// Returns the full sequence: the input ids followed by every generated id. Generation ends
    /// at an end-of-turn token (not included in the output), after `max_new_tokens`, or when
    /// `on_token` returns `Flow::Stop` (the token passed to that call is included).
    fn generate(
        &self,
        input_ids: &[u32],
        options: &SamplingOptions,
        on_token: &mut dyn FnMut(u32) -> Flow,
    ) -> ModelResult<Vec<u32>>;
}
