// Training error types

use std::path::PathBuf;

/// Failures of the training driver
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    /// Retraining requires an existing fine-tuned checkpoint.
    #[error("Checkpoint not found at {path}. Run `detoxifier train` first.")]
    MissingCheckpoint { path: PathBuf },

    /// The directory exists but lacks a required file.
    #[error("Checkpoint at {path} is incomplete: {reason}")]
    InvalidCheckpoint { path: PathBuf, reason: String },

    /// The tokenizer could not be loaded or failed on an input.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Nothing to train on for a run that requires data.
    #[error("No training examples: {0}")]
    EmptyCorpus(String),

    /// The model backend failed while training or saving.
    #[error("Training backend failed: {0:#}")]
    Backend(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for training operations.
pub type TrainingResult<T> = std::result::Result<T, TrainingError>;
