// Text generation seam used by the server

use anyhow::Result;

use super::sampling::SamplingParams;

/// A loaded detoxification model
pub trait TextGenerator: Send + Sync {
    /// Short name shown by the health endpoint
    fn name(&self) -> &str;

    /// Rewrite `source` once with the given sampling settings.
    fn generate(&self, source: &str, params: &SamplingParams) -> Result<String>;

    /// Reload weights from disk after a retrain.
    fn reload(&self) -> Result<()>;
}
