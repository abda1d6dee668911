// Shared fixtures for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use detoxifier::config::Config;

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

pub const ORIGINAL_WEIGHTS: &str = "original weights";

/// Write a checkpoint directory with placeholder weights and a label map.
pub fn write_checkpoint(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("config.json"), "{}").unwrap();
    fs::write(dir.join("model.safetensors"), ORIGINAL_WEIGHTS).unwrap();
    fs::write(dir.join("tokenizer.json"), TEST_TOKENIZER).unwrap();
    fs::write(dir.join("labels.json"), r#"{"0": "neutral", "1": "toxic"}"#).unwrap();
}

/// Config with every path inside `root`
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.checkpoint_dir = root.join("t5-small-detox-finetuned");
    config.paths.feedback_store = root.join("user_ratings.jsonl");
    config.paths.preference_store = root.join("user_preferences.jsonl");
    config.paths.metrics_log = root.join("metrics_log.txt");
    config.training.max_length = 8;
    config.training.logging_steps = 2;
    config
}
