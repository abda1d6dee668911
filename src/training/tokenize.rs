// Seq2seq tokenization for fine-tuning
//
// Inputs are prefixed with the task prompt and both sides are padded and
// truncated to a fixed length. Padded target positions become IGNORE_INDEX
// so they never contribute to the loss.

use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use super::checkpoint::Checkpoint;
use super::error::{TrainingError, TrainingResult};
use crate::config::constants::IGNORE_INDEX;
use crate::curation::{CuratedExample, PreferencePair};

const PAD_TOKEN: &str = "<pad>";

/// One tokenized (input, target) example
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels: Vec<i64>,
}

impl EncodedExample {
    /// Input ids without padding
    pub fn encoder_ids(&self) -> Vec<u32> {
        self.input_ids
            .iter()
            .zip(&self.attention_mask)
            .filter(|(_, mask)| **mask != 0)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Target ids without the ignored positions
    pub fn target_ids(&self) -> Vec<u32> {
        self.labels
            .iter()
            .filter(|label| **label != IGNORE_INDEX)
            .map(|label| *label as u32)
            .collect()
    }
}

/// Tokenized preference pair, unpadded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPair {
    pub prompt_ids: Vec<u32>,
    pub chosen_ids: Vec<u32>,
    pub rejected_ids: Vec<u32>,
}

pub struct Seq2SeqEncoder {
    tokenizer: Tokenizer,
    max_length: usize,
    prefix: String,
}

impl Seq2SeqEncoder {
    pub fn from_checkpoint(
        checkpoint: &Checkpoint,
        max_length: usize,
        prefix: &str,
    ) -> TrainingResult<Self> {
        Self::from_file(&checkpoint.tokenizer_path(), max_length, prefix)
    }

    pub fn from_file(path: &Path, max_length: usize, prefix: &str) -> TrainingResult<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            TrainingError::Tokenizer(format!("failed to load {}: {}", path.display(), e))
        })?;
        Self::new(tokenizer, max_length, prefix)
    }

    pub fn new(mut tokenizer: Tokenizer, max_length: usize, prefix: &str) -> TrainingResult<Self> {
        let pad_id = tokenizer.token_to_id(PAD_TOKEN).unwrap_or(0);
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token: PAD_TOKEN.to_string(),
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| TrainingError::Tokenizer(e.to_string()))?;

        Ok(Self {
            tokenizer,
            max_length,
            prefix: prefix.to_string(),
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn encode_example(&self, example: &CuratedExample) -> TrainingResult<EncodedExample> {
        let input = self.encode(&format!("{}{}", self.prefix, example.input_text))?;
        let target = self.encode(&example.target_text)?;

        let labels = target
            .get_ids()
            .iter()
            .zip(target.get_attention_mask())
            .map(|(id, mask)| if *mask == 0 { IGNORE_INDEX } else { *id as i64 })
            .collect();

        Ok(EncodedExample {
            input_ids: input.get_ids().to_vec(),
            attention_mask: input.get_attention_mask().to_vec(),
            labels,
        })
    }

    pub fn encode_examples(&self, examples: &[CuratedExample]) -> TrainingResult<Vec<EncodedExample>> {
        examples.iter().map(|e| self.encode_example(e)).collect()
    }

    pub fn encode_pair(&self, pair: &PreferencePair) -> TrainingResult<EncodedPair> {
        Ok(EncodedPair {
            prompt_ids: self.encode_unpadded(&format!("{}{}", self.prefix, pair.prompt))?,
            chosen_ids: self.encode_unpadded(&pair.chosen)?,
            rejected_ids: self.encode_unpadded(&pair.rejected)?,
        })
    }

    pub fn encode_pairs(&self, pairs: &[PreferencePair]) -> TrainingResult<Vec<EncodedPair>> {
        pairs.iter().map(|p| self.encode_pair(p)).collect()
    }

    fn encode(&self, text: &str) -> TrainingResult<tokenizers::Encoding> {
        self.tokenizer
            .encode(text, true)
            .map_err(|e| TrainingError::Tokenizer(e.to_string()))
    }

    fn encode_unpadded(&self, text: &str) -> TrainingResult<Vec<u32>> {
        let encoding = self.encode(text)?;
        Ok(encoding
            .get_ids()
            .iter()
            .zip(encoding.get_attention_mask())
            .filter(|(_, mask)| **mask != 0)
            .map(|(id, _)| *id)
            .collect())
    }
}
