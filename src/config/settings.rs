// Configuration structs
//
// Every component receives its section at construction time; nothing reads
// process-wide mutable state.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::constants::*;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File and directory locations
    pub paths: PathsConfig,
    /// Rating scale and replication policy
    pub curation: CurationConfig,
    /// Supervised training hyperparameters
    pub training: TrainingConfig,
    /// Preference (DPO) retraining hyperparameters
    pub preference: PreferenceConfig,
    /// Candidate generation settings
    pub generation: GenerationConfig,
    /// HTTP server settings
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Fine-tuned checkpoint directory (weights, tokenizer, optional label map)
    pub checkpoint_dir: PathBuf,
    /// Rating store
    pub feedback_store: PathBuf,
    /// Preference store
    pub preference_store: PathBuf,
    /// Step/loss log appended during training
    pub metrics_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            feedback_store: PathBuf::from(DEFAULT_FEEDBACK_STORE),
            preference_store: PathBuf::from(DEFAULT_PREFERENCE_STORE),
            metrics_log: PathBuf::from(DEFAULT_METRICS_LOG),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Lowest rating; records at this value are discarded
    pub rating_floor: u8,
    /// Highest rating; records at this value are emphasized
    pub rating_ceiling: u8,
    /// Copies emitted for a ceiling-rated record
    pub ceiling_replication: u32,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            rating_floor: 1,
            rating_ceiling: 5,
            ceiling_replication: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Base model for `train` when `--base` is not given: a local
    /// checkpoint directory or a Hugging Face model id
    pub base_model: String,
    /// Fixed token length for inputs and targets
    pub max_length: usize,
    /// Prefix prepended to every source text
    pub prompt_prefix: String,
    /// Learning rate of the initial supervised run
    pub base_learning_rate: f64,
    /// Learning rate of in-place retraining on rated feedback
    pub retrain_learning_rate: f64,
    /// Epochs of the initial supervised run
    pub epochs: usize,
    /// Epochs of in-place retraining
    pub retrain_epochs: usize,
    pub batch_size: usize,
    pub weight_decay: f64,
    /// Write a metrics line every N optimizer steps
    pub logging_steps: usize,
    /// Held-out share of the initial corpus
    pub eval_fraction: f64,
    pub seed: u64,
    /// Compute device: "cpu", "cuda", "metal" or "auto"
    pub device: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            base_model: DEFAULT_BASE_MODEL.to_string(),
            max_length: 128,
            prompt_prefix: DEFAULT_PROMPT_PREFIX.to_string(),
            base_learning_rate: 3e-5,
            retrain_learning_rate: 3e-6,
            epochs: 10,
            retrain_epochs: 2,
            batch_size: 4,
            weight_decay: 0.01,
            logging_steps: 5,
            eval_fraction: 0.05,
            seed: 42,
            device: "cpu".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceConfig {
    pub learning_rate: f64,
    /// Strength of the preference loss
    pub beta: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Chosen text that marks an input as impossible to rewrite
    pub unfixable_marker: String,
    /// Chosen completion substituted for the marker
    pub unfixable_chosen: String,
    /// Rejected completion substituted for the marker
    pub unfixable_rejected: String,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-6,
            beta: 0.1,
            epochs: 2,
            batch_size: 4,
            unfixable_marker: UNFIXABLE_MARKER.to_string(),
            unfixable_chosen: UNFIXABLE_CHOSEN.to_string(),
            unfixable_rejected: UNFIXABLE_REJECTED.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Candidates generated per request
    pub num_candidates: usize,
    pub temperature: f64,
    pub top_p: f64,
    /// Upper bound on generated tokens regardless of input length
    pub max_new_tokens_cap: usize,
    /// Longest tokenized input fed to the encoder
    pub max_input_length: usize,
    /// Fixed RNG seed (None = entropy)
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            num_candidates: 3,
            temperature: 0.9,
            top_p: 0.95,
            max_new_tokens_cap: MAX_NEW_TOKENS_CAP,
            max_input_length: 512,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:5000")
    pub bind_address: String,
    /// Retraining mode triggered by `POST /retrain` without a body
    pub retrain_mode: String,
    /// Seconds before a retraining child process is killed
    pub retrain_timeout_secs: u64,
    /// Maximum request body in bytes
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_HTTP_ADDR.to_string(),
            retrain_mode: "preferences".to_string(),
            retrain_timeout_secs: DEFAULT_RETRAIN_TIMEOUT_SECS,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> Result<()> {
        let curation = &self.curation;
        if curation.rating_floor >= curation.rating_ceiling {
            bail!(
                "curation.rating_floor ({}) must be below curation.rating_ceiling ({})",
                curation.rating_floor,
                curation.rating_ceiling
            );
        }
        if curation.ceiling_replication == 0 {
            bail!("curation.ceiling_replication must be at least 1");
        }

        let training = &self.training;
        if training.max_length == 0 || training.batch_size == 0 || training.logging_steps == 0 {
            bail!("training.max_length, training.batch_size and training.logging_steps must be positive");
        }
        if !(0.0..1.0).contains(&training.eval_fraction) {
            bail!("training.eval_fraction must be in [0, 1)");
        }
        // Retraining must stay an order of magnitude below the original rate
        if training.retrain_learning_rate * 10.0 > training.base_learning_rate {
            bail!(
                "training.retrain_learning_rate ({:e}) must be at most a tenth of training.base_learning_rate ({:e})",
                training.retrain_learning_rate,
                training.base_learning_rate
            );
        }
        if self.preference.learning_rate * 10.0 > training.base_learning_rate {
            bail!(
                "preference.learning_rate ({:e}) must be at most a tenth of training.base_learning_rate ({:e})",
                self.preference.learning_rate,
                training.base_learning_rate
            );
        }
        if self.preference.beta <= 0.0 {
            bail!("preference.beta must be positive");
        }
        if self.preference.batch_size == 0 {
            bail!("preference.batch_size must be positive");
        }

        let generation = &self.generation;
        if generation.num_candidates == 0 {
            bail!("generation.num_candidates must be at least 1");
        }
        if !(generation.top_p > 0.0 && generation.top_p <= 1.0) {
            bail!("generation.top_p must be in (0, 1]");
        }
        // Greedy decoding would make every candidate identical
        if !(generation.temperature.is_finite() && generation.temperature > 0.0) {
            bail!("generation.temperature must be positive, got {}", generation.temperature);
        }

        self.server.retrain_mode.parse::<RetrainMode>()?;
        if self.server.retrain_timeout_secs == 0 {
            bail!("server.retrain_timeout_secs must be positive");
        }

        Ok(())
    }
}

/// Which store a retraining run consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrainMode {
    /// Supervised retrain on curated ratings
    Ratings,
    /// Preference (DPO) retrain on chosen/rejected pairs
    Preferences,
}

impl RetrainMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrainMode::Ratings => "ratings",
            RetrainMode::Preferences => "preferences",
        }
    }
}

impl std::str::FromStr for RetrainMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ratings" | "feedback" => Ok(RetrainMode::Ratings),
            "preferences" | "dpo" => Ok(RetrainMode::Preferences),
            other => bail!("Unknown retrain mode '{}' (expected 'ratings' or 'preferences')", other),
        }
    }
}

impl std::fmt::Display for RetrainMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
