use super::{Flow, ModelHandle, ParameterCount, SamplingOptions};
use crate::errors::{ModelError, ModelResult};
use candle_core::{quantized::gguf_file, DType, Device, Tensor};
use candle_transformers::{
    generation::{LogitsProcessor, Sampling},
    models::quantized_gemma3::ModelWeights,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;

/// Tokens that close an assistant turn. Missing ones are skipped.
const STOP_TOKENS: [&str; 3] = ["<eos>", "<end_of_turn>", "<|im_end|>"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
}

impl DeviceKind {
    fn to_device(self) -> ModelResult<Device> {
        match self {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Cuda => Device::new_cuda(0)
                .map_err(|e| ModelError::Load(format!("CUDA device unavailable: {}", e))),
        }
    }
}

/// Quantized Gemma 3 weights loaded from GGUF, with the matching tokenizer.
///
/// `ModelWeights::forward` needs `&mut self` for its KV cache, so generations are serialized
/// on the mutex: concurrent requests wait for the model instead of interleaving cache state.
pub struct GemmaModel {
    name: String,
    weights: Mutex<ModelWeights>,
    tokenizer: Tokenizer,
    device: Device,
    stop_tokens: Vec<u32>,
    parameters: u64,
}

impl GemmaModel {
    pub fn load(
        name: impl Into<String>,
        gguf_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        device: DeviceKind,
    ) -> ModelResult<Self> {
        let device = device.to_device()?;

        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref())
            .map_err(|e| ModelError::Load(format!("Failed to load tokenizer: {}", e)))?;

        let stop_tokens: Vec<u32> = STOP_TOKENS
            .iter()
            .filter_map(|token| tokenizer.token_to_id(token))
            .collect();
        if stop_tokens.is_empty() {
            return Err(ModelError::Load(
                "Tokenizer has no end-of-turn token".to_string(),
            ));
        }

        let mut file = std::fs::File::open(gguf_path.as_ref())
            .map_err(|e| ModelError::Load(format!("Failed to open model file: {}", e)))?;
        let content = gguf_file::Content::read(&mut file)
            .map_err(|e| ModelError::Load(format!("Failed to read GGUF file: {}", e)))?;

        let parameters = content
            .tensor_infos
            .values()
            .map(|info| info.shape.elem_count() as u64)
            .sum();

        let weights = ModelWeights::from_gguf(content, &mut file, &device)
            .map_err(|e| ModelError::Load(format!("Failed to load model weights: {}", e)))?;

        Ok(Self {
            name: name.into(),
            weights: Mutex::new(weights),
            tokenizer,
            device,
            stop_tokens,
            parameters,
        })
    }

    fn sampling(options: &SamplingOptions) -> Sampling {
        if !options.do_sample || options.temperature <= 0.0 {
            return Sampling::ArgMax;
        }
        match options.top_p {
            Some(p) => Sampling::TopP {
                p,
                temperature: options.temperature,
            },
            None => Sampling::All {
                temperature: options.temperature,
            },
        }
    }
}

impl ModelHandle for GemmaModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> String {
        if self.device.is_cuda() {
            "cuda".to_string()
        } else if self.device.is_metal() {
            "metal".to_string()
        } else {
            "cpu".to_string()
        }
    }

    fn parameter_count(&self) -> ParameterCount {
        // inference weights carry no gradients
        ParameterCount {
            parameters: self.parameters,
            trainable_parameters: 0,
        }
    }

    fn encode(&self, text: &str) -> ModelResult<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| ModelError::Generation(format!("Failed to encode text: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> ModelResult<String> {
        self.tokenizer
            .decode(ids, skip_special_tokens)
            .map_err(|e| ModelError::Generation(format!("Failed to decode tokens: {}", e)))
    }

    fn generate(
        &self,
        input_ids: &[u32],
        options: &SamplingOptions,
        on_token: &mut dyn FnMut(u32) -> Flow,
    ) -> ModelResult<Vec<u32>> {
        if input_ids.is_empty() {
            return Err(ModelError::Generation(
                "Tokenization produced no tokens".to_string(),
            ));
        }

        let mut weights = self
            .weights
            .lock()
            .map_err(|e| ModelError::Generation(format!("Failed to lock model: {}", e)))?;
        let mut logits_processor =
            LogitsProcessor::from_sampling(options.seed, Self::sampling(options));

        let mut tokens = input_ids.to_vec();
        let mut index_pos = 0;

        for step in 0..options.max_new_tokens {
            // the prompt goes in whole once (which also resets the KV cache), then one token a step
            let context = if step == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = weights.forward(&input, index_pos)?;
            index_pos += context.len();

            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let next_token = logits_processor.sample(&logits)?;

            if self.stop_tokens.contains(&next_token) {
                break;
            }
            tokens.push(next_token);

            if on_token(next_token) == Flow::Stop {
                break;
            }
        }

        Ok(tokens)
    }
}
