// Metrics module
// Step/loss log written during training

mod logger;
mod types;

pub use logger::{MetricsLogger, MetricsSummary};
pub use types::StepMetric;
