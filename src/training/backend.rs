// Fine-tuning backend seam
//
// The driver owns preconditions, encoding and checkpoint replacement. A
// backend only turns encoded data plus a source checkpoint into a weights
// file, reporting each optimizer step to a TrainingMonitor.

use anyhow::Result;
use std::path::Path;

use super::checkpoint::Checkpoint;
use super::tokenize::{EncodedExample, EncodedPair};
use crate::metrics::{MetricsLogger, StepMetric};

/// Hyperparameters for teacher-forced cross-entropy training
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisedParams {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
}

/// Hyperparameters for sigmoid DPO against a frozen reference model
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceParams {
    pub learning_rate: f64,
    pub beta: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
}

/// What a backend run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSummary {
    /// Optimizer steps taken
    pub steps: usize,
    /// Loss of the last step
    pub final_loss: Option<f64>,
    /// Loss on the held-out split after the last epoch
    pub eval_loss: Option<f64>,
}

pub trait FineTuneBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Train on (input, target) examples starting from `source`, writing
    /// the resulting weights to `weights_out`. `eval` may be empty.
    fn supervised(
        &self,
        source: &Checkpoint,
        weights_out: &Path,
        train: &[EncodedExample],
        eval: &[EncodedExample],
        params: &SupervisedParams,
        monitor: &mut TrainingMonitor<'_>,
    ) -> Result<TrainingSummary>;

    /// Preference-optimize `source` on (prompt, chosen, rejected) triples.
    /// `source` also serves as the frozen reference model.
    fn preference(
        &self,
        source: &Checkpoint,
        weights_out: &Path,
        pairs: &[EncodedPair],
        params: &PreferenceParams,
        monitor: &mut TrainingMonitor<'_>,
    ) -> Result<TrainingSummary>;
}

/// Writes every `logging_steps`-th step to the metrics log
pub struct TrainingMonitor<'a> {
    logger: &'a MetricsLogger,
    logging_steps: usize,
    steps: usize,
    last: Option<StepMetric>,
}

impl<'a> TrainingMonitor<'a> {
    pub fn new(logger: &'a MetricsLogger, logging_steps: usize) -> Self {
        Self {
            logger,
            logging_steps: logging_steps.max(1),
            steps: 0,
            last: None,
        }
    }

    /// Record one optimizer step. Steps are numbered from 1.
    pub fn step(&mut self, loss: f64) -> Result<()> {
        self.steps += 1;
        let metric = StepMetric::new(self.steps, loss);
        self.last = Some(metric);

        if self.steps % self.logging_steps == 0 {
            tracing::info!(step = metric.step, loss = metric.loss, "Training step");
            self.logger.log(&metric)?;
        }
        Ok(())
    }

    pub fn eval(&mut self, epoch: usize, loss: f64) -> Result<()> {
        self.logger.log_eval(epoch, loss)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn last(&self) -> Option<StepMetric> {
        self.last
    }
}
