// Retraining driver
//
// Checks the checkpoint precondition, skips runs with nothing to learn from,
// encodes the data, hands it to the backend and swaps the staged result into
// place. A failed run leaves the live checkpoint exactly as it was.

use anyhow::Context;
use std::fmt;
use std::path::{Path, PathBuf};

use super::backend::{
    FineTuneBackend, PreferenceParams, SupervisedParams, TrainingMonitor, TrainingSummary,
};
use super::checkpoint::{Checkpoint, StagedCheckpoint};
use super::error::{TrainingError, TrainingResult};
use super::tokenize::Seq2SeqEncoder;
use crate::config::{Config, PreferenceConfig, RetrainMode, TrainingConfig};
use crate::curation::dataset::split_train_eval;
use crate::curation::{
    curate_feedback, prepare_preferences, CuratedExample, CurationPolicy, PreferencePair,
    UnfixablePolicy,
};
use crate::feedback::{FeedbackStore, PreferenceStore};
use crate::metrics::MetricsLogger;

/// Outcome of a retraining run
#[derive(Debug, Clone, PartialEq)]
pub enum RetrainReport {
    Trained {
        examples: usize,
        steps: usize,
        final_loss: Option<f64>,
        checkpoint: PathBuf,
    },
    Skipped {
        reason: String,
    },
}

impl RetrainReport {
    pub fn is_trained(&self) -> bool {
        matches!(self, Self::Trained { .. })
    }
}

impl fmt::Display for RetrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trained {
                examples,
                steps,
                final_loss,
                checkpoint,
            } => {
                write!(
                    f,
                    "Trained on {} examples in {} steps, saved to {}",
                    examples,
                    steps,
                    checkpoint.display()
                )?;
                if let Some(loss) = final_loss {
                    write!(f, " (final loss {:.4})", loss)?;
                }
                Ok(())
            }
            Self::Skipped { reason } => write!(f, "Skipped: {}", reason),
        }
    }
}

/// Curated data read from one of the stores
#[derive(Debug, Clone)]
pub enum TrainingInputs {
    Feedback(Vec<CuratedExample>),
    Preferences(Vec<PreferencePair>),
}

impl TrainingInputs {
    /// Load and curate the store that `mode` trains on.
    pub fn load(mode: RetrainMode, config: &Config) -> anyhow::Result<Self> {
        match mode {
            RetrainMode::Ratings => {
                let records = FeedbackStore::open(&config.paths.feedback_store)?
                    .load()
                    .context("Failed to load feedback store")?;
                let policy = CurationPolicy::from(&config.curation);
                Ok(Self::Feedback(curate_feedback(&records, &policy)))
            }
            RetrainMode::Preferences => {
                let records = PreferenceStore::open(&config.paths.preference_store)?
                    .load()
                    .context("Failed to load preference store")?;
                let policy = UnfixablePolicy::from(&config.preference);
                Ok(Self::Preferences(prepare_preferences(&records, &policy)))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Feedback(examples) => examples.len(),
            Self::Preferences(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RetrainingDriver {
    backend: Box<dyn FineTuneBackend>,
    training: TrainingConfig,
    preference: PreferenceConfig,
    metrics: MetricsLogger,
}

impl RetrainingDriver {
    pub fn new(backend: Box<dyn FineTuneBackend>, config: &Config) -> anyhow::Result<Self> {
        let metrics = MetricsLogger::new(config.paths.metrics_log.clone())?;
        Ok(Self {
            backend,
            training: config.training.clone(),
            preference: config.preference.clone(),
            metrics,
        })
    }

    pub fn metrics(&self) -> &MetricsLogger {
        &self.metrics
    }

    /// Run whichever retrain `inputs` calls for against `checkpoint_dir`.
    pub fn retrain(
        &self,
        checkpoint_dir: &Path,
        inputs: &TrainingInputs,
    ) -> TrainingResult<RetrainReport> {
        match inputs {
            TrainingInputs::Feedback(examples) => self.retrain_on_feedback(checkpoint_dir, examples),
            TrainingInputs::Preferences(pairs) => self.retrain_on_preferences(checkpoint_dir, pairs),
        }
    }

    /// Fine-tune the checkpoint in place on curated rated feedback.
    pub fn retrain_on_feedback(
        &self,
        checkpoint_dir: &Path,
        examples: &[CuratedExample],
    ) -> TrainingResult<RetrainReport> {
        let checkpoint = Checkpoint::recover(checkpoint_dir)?;
        if examples.is_empty() {
            tracing::info!("No curated feedback to train on, skipping retrain");
            return Ok(RetrainReport::Skipped {
                reason: "no feedback examples passed curation".to_string(),
            });
        }

        let encoder = self.encoder(&checkpoint)?;
        let encoded = encoder.encode_examples(examples)?;
        let params = SupervisedParams {
            learning_rate: self.training.retrain_learning_rate,
            weight_decay: self.training.weight_decay,
            epochs: self.training.retrain_epochs,
            batch_size: self.training.batch_size,
            seed: self.training.seed,
        };

        tracing::info!(
            examples = encoded.len(),
            backend = self.backend.name(),
            "Retraining on rated feedback"
        );
        self.run_staged(&checkpoint, checkpoint_dir, examples.len(), |staged, monitor| {
            self.backend
                .supervised(&checkpoint, &staged.weights_path(), &encoded, &[], &params, monitor)
        })
    }

    /// Preference-optimize the checkpoint in place on chosen/rejected pairs.
    pub fn retrain_on_preferences(
        &self,
        checkpoint_dir: &Path,
        pairs: &[PreferencePair],
    ) -> TrainingResult<RetrainReport> {
        let checkpoint = Checkpoint::recover(checkpoint_dir)?;
        if pairs.is_empty() {
            tracing::info!("No preference pairs to train on, skipping retrain");
            return Ok(RetrainReport::Skipped {
                reason: "no usable preference pairs".to_string(),
            });
        }

        let encoder = self.encoder(&checkpoint)?;
        let encoded = encoder.encode_pairs(pairs)?;
        let params = PreferenceParams {
            learning_rate: self.preference.learning_rate,
            beta: self.preference.beta,
            epochs: self.preference.epochs,
            batch_size: self.preference.batch_size,
            seed: self.training.seed,
        };

        tracing::info!(
            pairs = encoded.len(),
            beta = params.beta,
            backend = self.backend.name(),
            "Retraining on preferences"
        );
        self.run_staged(&checkpoint, checkpoint_dir, pairs.len(), |staged, monitor| {
            self.backend
                .preference(&checkpoint, &staged.weights_path(), &encoded, &params, monitor)
        })
    }

    /// Fine-tune a base model on the parallel corpus, holding out an
    /// evaluation split, and write the result to `output_dir`.
    pub fn train_initial(
        &self,
        base: &Checkpoint,
        output_dir: &Path,
        examples: Vec<CuratedExample>,
    ) -> TrainingResult<RetrainReport> {
        if examples.is_empty() {
            return Err(TrainingError::EmptyCorpus(
                "the parallel corpus produced no examples".to_string(),
            ));
        }

        let total = examples.len();
        let (train, eval) =
            split_train_eval(examples, self.training.eval_fraction, self.training.seed);
        tracing::info!(train = train.len(), eval = eval.len(), "Split parallel corpus");

        let encoder = self.encoder(base)?;
        let train = encoder.encode_examples(&train)?;
        let eval = encoder.encode_examples(&eval)?;
        let params = SupervisedParams {
            learning_rate: self.training.base_learning_rate,
            weight_decay: self.training.weight_decay,
            epochs: self.training.epochs,
            batch_size: self.training.batch_size,
            seed: self.training.seed,
        };

        self.run_staged(base, output_dir, total, |staged, monitor| {
            self.backend
                .supervised(base, &staged.weights_path(), &train, &eval, &params, monitor)
        })
    }

    fn encoder(&self, checkpoint: &Checkpoint) -> TrainingResult<Seq2SeqEncoder> {
        Seq2SeqEncoder::from_checkpoint(
            checkpoint,
            self.training.max_length,
            &self.training.prompt_prefix,
        )
    }

    fn run_staged<F>(
        &self,
        source: &Checkpoint,
        target: &Path,
        examples: usize,
        train: F,
    ) -> TrainingResult<RetrainReport>
    where
        F: FnOnce(&StagedCheckpoint, &mut TrainingMonitor<'_>) -> anyhow::Result<TrainingSummary>,
    {
        let staged = StagedCheckpoint::begin(target)?;
        let mut monitor = TrainingMonitor::new(&self.metrics, self.training.logging_steps);

        // Dropping `staged` on error removes the staging directory.
        let summary = train(&staged, &mut monitor)?;
        staged.copy_assets_from(source)?;
        let checkpoint = staged.commit()?;

        if let Some(eval_loss) = summary.eval_loss {
            tracing::info!(eval_loss, "Final evaluation loss");
        }
        Ok(RetrainReport::Trained {
            examples,
            steps: summary.steps,
            final_loss: summary.final_loss,
            checkpoint: checkpoint.dir().to_path_buf(),
        })
    }
}
