// T5 detoxification generator (Candle)
//
// Loads a fine-tuned checkpoint and decodes autoregressively with the KV
// cache, sampling each token with the nucleus sampler.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::t5::{self, T5ForConditionalGeneration};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokenizers::Tokenizer;

use super::device::select_device;
use super::generator::TextGenerator;
use super::sampling::{max_new_tokens, NucleusSampler, SamplingParams};
use crate::config::{GenerationConfig, TrainingConfig};
use crate::training::Checkpoint;

struct LoadedT5 {
    model: T5ForConditionalGeneration,
    tokenizer: Tokenizer,
    decoder_start: u32,
    eos: u32,
    use_cache: bool,
}

impl LoadedT5 {
    fn load(dir: &Path, device: &Device) -> Result<Self> {
        let checkpoint = Checkpoint::open(dir)?;

        let tokenizer = Tokenizer::from_file(checkpoint.tokenizer_path())
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let config_str = std::fs::read_to_string(checkpoint.config_path())
            .context("Failed to read config.json")?;
        let config: t5::Config =
            serde_json::from_str(&config_str).context("Failed to parse config.json")?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[checkpoint.weights_path()], DType::F32, device)
                .context("Failed to load model weights")?
        };
        let model = T5ForConditionalGeneration::load(vb, &config).context("Failed to build T5 model")?;

        Ok(Self {
            model,
            tokenizer,
            decoder_start: config.decoder_start_token_id.unwrap_or(config.pad_token_id) as u32,
            eos: config.eos_token_id as u32,
            use_cache: config.use_cache,
        })
    }
}

pub struct T5Generator {
    checkpoint_dir: PathBuf,
    device: Device,
    prefix: String,
    max_input_length: usize,
    max_new_tokens_cap: usize,
    state: Mutex<LoadedT5>,
}

impl T5Generator {
    pub fn load(
        checkpoint_dir: &Path,
        training: &TrainingConfig,
        generation: &GenerationConfig,
    ) -> Result<Self> {
        let device = select_device(&training.device)?;
        let state = LoadedT5::load(checkpoint_dir, &device)?;
        tracing::info!("Loaded T5 checkpoint from {}", checkpoint_dir.display());

        Ok(Self {
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            device,
            prefix: training.prompt_prefix.clone(),
            max_input_length: generation.max_input_length,
            max_new_tokens_cap: generation.max_new_tokens_cap,
            state: Mutex::new(state),
        })
    }
}

impl TextGenerator for T5Generator {
    fn name(&self) -> &str {
        "t5 (candle)"
    }

    fn generate(&self, source: &str, params: &SamplingParams) -> Result<String> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow!("Generator lock poisoned"))?;
        let state = &mut *guard;

        let encoding = state
            .tokenizer
            .encode(format!("{}{}", self.prefix, source), true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
        let mut input_ids = encoding.get_ids().to_vec();
        input_ids.truncate(self.max_input_length);

        state.model.clear_kv_cache();
        let input = Tensor::new(input_ids.as_slice(), &self.device)?.unsqueeze(0)?;
        let encoder_output = state.model.encode(&input)?;

        let limit = max_new_tokens(source, self.max_new_tokens_cap);
        let mut sampler = NucleusSampler::new(*params);
        let mut output = vec![state.decoder_start];
        for index in 0..limit {
            let decoder_ids = if index == 0 || !state.use_cache {
                &output[..]
            } else {
                &output[output.len() - 1..]
            };
            let decoder_input = Tensor::new(decoder_ids, &self.device)?.unsqueeze(0)?;
            let logits: Vec<f32> = state
                .model
                .decode(&decoder_input, &encoder_output)?
                .squeeze(0)?
                .to_dtype(DType::F32)?
                .to_vec1()?;

            let next = sampler.sample(&logits);
            if next == state.eos {
                break;
            }
            output.push(next);
        }
        state.model.clear_kv_cache();

        let text = state
            .tokenizer
            .decode(&output[1..], true)
            .map_err(|e| anyhow!("Detokenization failed: {}", e))?;
        Ok(text.trim().to_string())
    }

    fn reload(&self) -> Result<()> {
        let fresh = LoadedT5::load(&self.checkpoint_dir, &self.device)?;
        let mut guard = self
            .state
            .lock()
            .map_err(|_| anyhow!("Generator lock poisoned"))?;
        *guard = fresh;
        tracing::info!("Reloaded T5 checkpoint from {}", self.checkpoint_dir.display());
        Ok(())
    }
}
