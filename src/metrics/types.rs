// Metrics data types

use serde::{Deserialize, Serialize};

/// Loss observed at one optimizer step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepMetric {
    pub step: usize,
    pub loss: f64,
}

impl StepMetric {
    pub fn new(step: usize, loss: f64) -> Self {
        Self { step, loss }
    }

    /// `Step <n> - Loss: <float>` with four decimals
    pub fn to_line(&self) -> String {
        format!("Step {} - Loss: {:.4}", self.step, self.loss)
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("Step ")?;
        let (step, loss) = rest.split_once(" - Loss: ")?;
        Some(Self {
            step: step.trim().parse().ok()?,
            loss: loss.trim().parse().ok()?,
        })
    }
}
