// Candle T5 fine-tuning backend
//
// Full-parameter AdamW fine-tuning of a candle-transformers T5 model. The
// supervised objective is teacher-forced token cross-entropy. The preference
// objective is sigmoid DPO against a frozen copy of the source weights.
//
// candle's T5 decoder only exposes logits for the last decoder position, so
// target log-probabilities are gathered one prefix at a time with the KV
// cache disabled.

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use candle_transformers::models::t5::{self, T5ForConditionalGeneration};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;

use super::backend::{
    FineTuneBackend, PreferenceParams, SupervisedParams, TrainingMonitor, TrainingSummary,
};
use super::checkpoint::Checkpoint;
use super::tokenize::{EncodedExample, EncodedPair};
use crate::models::select_device;

pub struct CandleT5Backend {
    device: Device,
}

impl CandleT5Backend {
    pub fn new(device: &str) -> Result<Self> {
        Ok(Self {
            device: select_device(device)?,
        })
    }

    fn load_config(checkpoint: &Checkpoint) -> Result<t5::Config> {
        let path = checkpoint.config_path();
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: t5::Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.use_cache = false;
        Ok(config)
    }

    /// Policy model whose weights live in a VarMap so the optimizer can update them
    fn load_trainable(&self, checkpoint: &Checkpoint) -> Result<(VarMap, Model)> {
        let config = Self::load_config(checkpoint)?;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let model = T5ForConditionalGeneration::load(vb, &config)?;
        varmap
            .load(checkpoint.weights_path())
            .with_context(|| format!("Failed to load weights from {}", checkpoint.dir().display()))?;
        Ok((varmap, Model::new(model, &config)))
    }

    /// Frozen reference model backed by the memory-mapped source weights
    fn load_frozen(&self, checkpoint: &Checkpoint) -> Result<Model> {
        let config = Self::load_config(checkpoint)?;
        let weights = checkpoint.weights_path();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &self.device)? };
        let model = T5ForConditionalGeneration::load(vb, &config)?;
        Ok(Model::new(model, &config))
    }

    fn optimizer(varmap: &VarMap, learning_rate: f64, weight_decay: f64) -> Result<AdamW> {
        let params = ParamsAdamW {
            lr: learning_rate,
            weight_decay,
            ..Default::default()
        };
        Ok(AdamW::new(varmap.all_vars(), params)?)
    }
}

struct Model {
    t5: T5ForConditionalGeneration,
    decoder_start: u32,
}

impl Model {
    fn new(model: T5ForConditionalGeneration, config: &t5::Config) -> Self {
        let decoder_start = config
            .decoder_start_token_id
            .unwrap_or(config.pad_token_id) as u32;
        Self {
            t5: model,
            decoder_start,
        }
    }

    /// Log-probability of each target token given the input, shape `[target_len]`
    fn token_log_probs(&mut self, input: &[u32], target: &[u32], device: &Device) -> Result<Tensor> {
        let input = Tensor::new(input, device)?.unsqueeze(0)?;
        let encoder_output = self.t5.encode(&input)?;

        let mut decoder_ids = Vec::with_capacity(target.len() + 1);
        decoder_ids.push(self.decoder_start);
        let mut picked = Vec::with_capacity(target.len());
        for &token in target {
            let decoder_input = Tensor::new(decoder_ids.as_slice(), device)?.unsqueeze(0)?;
            let logits = self.t5.decode(&decoder_input, &encoder_output)?;
            let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
            let index = Tensor::new(&[[token]], device)?;
            picked.push(log_probs.gather(&index, 1)?.squeeze(1)?);
            decoder_ids.push(token);
        }
        self.t5.clear_kv_cache();

        Ok(Tensor::cat(&picked, 0)?)
    }

    /// Mean token negative log-likelihood of one example
    fn example_loss(&mut self, example: &EncodedExample, device: &Device) -> Result<Option<Tensor>> {
        let target = example.target_ids();
        if target.is_empty() {
            return Ok(None);
        }
        let log_probs = self.token_log_probs(&example.encoder_ids(), &target, device)?;
        Ok(Some(log_probs.mean_all()?.neg()?))
    }

    /// Summed log-probability of a whole completion, a scalar tensor
    fn sequence_log_prob(&mut self, prompt: &[u32], completion: &[u32], device: &Device) -> Result<Tensor> {
        Ok(self.token_log_probs(prompt, completion, device)?.sum_all()?)
    }
}

/// -log(sigmoid(x)) = softplus(-x), computed as relu(-x) + log(1 + exp(-|x|))
fn neg_log_sigmoid(x: &Tensor) -> Result<Tensor> {
    let linear = x.neg()?.relu()?;
    let smooth = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok((linear + smooth)?)
}

fn mean_of(losses: Vec<Tensor>) -> Result<Option<Tensor>> {
    if losses.is_empty() {
        return Ok(None);
    }
    Ok(Some(Tensor::stack(&losses, 0)?.mean_all()?))
}

impl FineTuneBackend for CandleT5Backend {
    fn name(&self) -> &str {
        "candle-t5"
    }

    fn supervised(
        &self,
        source: &Checkpoint,
        weights_out: &Path,
        train: &[EncodedExample],
        eval: &[EncodedExample],
        params: &SupervisedParams,
        monitor: &mut TrainingMonitor<'_>,
    ) -> Result<TrainingSummary> {
        let (varmap, mut model) = self.load_trainable(source)?;
        let mut optimizer = Self::optimizer(&varmap, params.learning_rate, params.weight_decay)?;
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut summary = TrainingSummary::default();

        for epoch in 1..=params.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(params.batch_size.max(1)) {
                let mut losses = Vec::with_capacity(batch.len());
                for &i in batch {
                    if let Some(loss) = model.example_loss(&train[i], &self.device)? {
                        losses.push(loss);
                    }
                }
                let Some(loss) = mean_of(losses)? else {
                    continue;
                };

                optimizer.backward_step(&loss)?;
                let value = loss.to_scalar::<f32>()? as f64;
                monitor.step(value)?;
                summary.steps += 1;
                summary.final_loss = Some(value);
            }

            if !eval.is_empty() {
                let mut total = 0.0;
                let mut counted = 0usize;
                for example in eval {
                    if let Some(loss) = model.example_loss(example, &self.device)? {
                        total += loss.to_scalar::<f32>()? as f64;
                        counted += 1;
                    }
                }
                if counted > 0 {
                    let eval_loss = total / counted as f64;
                    monitor.eval(epoch, eval_loss)?;
                    summary.eval_loss = Some(eval_loss);
                }
            }
        }

        varmap
            .save(weights_out)
            .with_context(|| format!("Failed to save weights to {}", weights_out.display()))?;
        Ok(summary)
    }

    fn preference(
        &self,
        source: &Checkpoint,
        weights_out: &Path,
        pairs: &[EncodedPair],
        params: &PreferenceParams,
        monitor: &mut TrainingMonitor<'_>,
    ) -> Result<TrainingSummary> {
        let (varmap, mut policy) = self.load_trainable(source)?;
        let mut reference = self.load_frozen(source)?;
        let mut optimizer = Self::optimizer(&varmap, params.learning_rate, 0.0)?;
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut order: Vec<usize> = (0..pairs.len()).collect();
        let mut summary = TrainingSummary::default();

        for _epoch in 1..=params.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(params.batch_size.max(1)) {
                let mut losses = Vec::with_capacity(batch.len());
                for &i in batch {
                    let pair = &pairs[i];
                    if pair.chosen_ids.is_empty() || pair.rejected_ids.is_empty() {
                        continue;
                    }
                    let device = &self.device;
                    let policy_chosen = policy.sequence_log_prob(&pair.prompt_ids, &pair.chosen_ids, device)?;
                    let policy_rejected =
                        policy.sequence_log_prob(&pair.prompt_ids, &pair.rejected_ids, device)?;
                    let ref_chosen = reference.sequence_log_prob(&pair.prompt_ids, &pair.chosen_ids, device)?;
                    let ref_rejected =
                        reference.sequence_log_prob(&pair.prompt_ids, &pair.rejected_ids, device)?;

                    let policy_margin = (policy_chosen - policy_rejected)?;
                    let ref_margin = (ref_chosen - ref_rejected)?;
                    let logits = (policy_margin - ref_margin)?.affine(params.beta, 0.0)?;
                    losses.push(neg_log_sigmoid(&logits)?);
                }
                let Some(loss) = mean_of(losses)? else {
                    continue;
                };

                optimizer.backward_step(&loss)?;
                let value = loss.to_scalar::<f32>()? as f64;
                monitor.step(value)?;
                summary.steps += 1;
                summary.final_loss = Some(value);
            }
        }

        varmap
            .save(weights_out)
            .with_context(|| format!("Failed to save weights to {}", weights_out.display()))?;
        Ok(summary)
    }
}
