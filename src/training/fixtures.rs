// Test fixtures: a word-level tokenizer and a tiny randomly initialised T5

#![cfg_attr(not(feature = "candle"), allow(dead_code))]

use std::fs;
use std::path::Path;

use super::checkpoint::{CONFIG_FILE, TOKENIZER_FILE};

/// Whitespace word-level tokenizer covering the test sentences
pub const TEST_TOKENIZER: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": null,
    "pre_tokenizer": { "type": "Whitespace" },
    "post_processor": null,
    "decoder": null,
    "model": {
        "type": "WordLevel",
        "vocab": {
            "<pad>": 0, "</s>": 1, "<unk>": 2, "detoxify": 3, ":": 4,
            "you": 5, "are": 6, "bad": 7, "nice": 8, "none": 9,
            "UNTOXIFIABLE": 10, "stop": 11, "please": 12
        },
        "unk_token": "<unk>"
    }
}"#;

/// One encoder and one decoder layer, `d_model` 8, vocabulary 16
pub const TINY_T5_CONFIG: &str = r#"{
    "vocab_size": 16,
    "d_model": 8,
    "d_kv": 4,
    "d_ff": 16,
    "num_layers": 1,
    "num_decoder_layers": 1,
    "num_heads": 2,
    "relative_attention_num_buckets": 8,
    "relative_attention_max_distance": 16,
    "dropout_rate": 0.0,
    "layer_norm_epsilon": 1e-6,
    "initializer_factor": 1.0,
    "feed_forward_proj": "relu",
    "tie_word_embeddings": true,
    "is_decoder": false,
    "is_encoder_decoder": true,
    "use_cache": true,
    "pad_token_id": 0,
    "eos_token_id": 1,
    "decoder_start_token_id": 0
}"#;

pub fn tokenizer() -> tokenizers::Tokenizer {
    tokenizers::Tokenizer::from_bytes(TEST_TOKENIZER.as_bytes()).unwrap()
}

/// Write a complete checkpoint with freshly initialised weights into `dir`.
#[cfg(feature = "candle")]
pub fn write_tiny_t5(dir: &Path) {
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use candle_transformers::models::t5::{Config, T5ForConditionalGeneration};

    use super::checkpoint::WEIGHTS_FILE;

    fs::create_dir_all(dir).unwrap();
    let config: Config = serde_json::from_str(TINY_T5_CONFIG).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    T5ForConditionalGeneration::load(vb, &config).unwrap();
    varmap.save(dir.join(WEIGHTS_FILE)).unwrap();
    write_assets(dir);
}

/// Config and tokenizer, without weights
pub fn write_assets(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(CONFIG_FILE), TINY_T5_CONFIG).unwrap();
    fs::write(dir.join(TOKENIZER_FILE), TEST_TOKENIZER).unwrap();
}
