// Training metrics log
//
// Appends one `Step <n> - Loss: <float>` line per logged optimizer step so a
// run can be inspected offline with nothing more than `tail`.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::StepMetric;

pub struct MetricsLogger {
    log_file: PathBuf,
}

impl MetricsLogger {
    pub fn new(log_file: PathBuf) -> Result<Self> {
        if let Some(parent) = log_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create metrics directory: {}", parent.display())
                })?;
            }
        }

        Ok(Self { log_file })
    }

    pub fn path(&self) -> &Path {
        &self.log_file
    }

    /// Append a step/loss line
    pub fn log(&self, metric: &StepMetric) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open metrics log: {}", self.log_file.display()))?;

        writeln!(file, "{}", metric.to_line()).context("Failed to write metric to log")?;

        tracing::debug!(step = metric.step, loss = metric.loss, "Logged training step");
        Ok(())
    }

    /// Append an end-of-epoch evaluation line. Not parsed back as a step.
    pub fn log_eval(&self, epoch: usize, loss: f64) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open metrics log: {}", self.log_file.display()))?;

        writeln!(file, "Eval after epoch {} - Loss: {:.4}", epoch, loss)
            .context("Failed to write eval loss to log")?;

        tracing::info!(epoch, eval_loss = loss, "Evaluation finished");
        Ok(())
    }

    /// Parse every step line back. Lines in other formats are ignored.
    pub fn read_metrics(&self) -> Result<Vec<StepMetric>> {
        if !self.log_file.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.log_file)
            .with_context(|| format!("Failed to read metrics log: {}", self.log_file.display()))?;

        Ok(contents.lines().filter_map(StepMetric::parse_line).collect())
    }

    /// Summary over everything logged so far
    pub fn summary(&self) -> Result<MetricsSummary> {
        let metrics = self.read_metrics()?;
        let total = metrics.len();
        let last = metrics.last().copied();
        let best = metrics
            .iter()
            .copied()
            .min_by(|a, b| a.loss.total_cmp(&b.loss));

        Ok(MetricsSummary { total, last, best })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSummary {
    pub total: usize,
    pub last: Option<StepMetric>,
    pub best: Option<StepMetric>,
}
