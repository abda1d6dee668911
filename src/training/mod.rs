// Training module
// Seq2seq fine-tuning on curated feedback and preference pairs

mod backend;
#[cfg(feature = "candle")]
mod candle_backend;
pub mod checkpoint;
mod driver;
mod error;
#[cfg(test)]
pub(crate) mod fixtures;
mod tokenize;

pub use backend::{
    FineTuneBackend, PreferenceParams, SupervisedParams, TrainingMonitor, TrainingSummary,
};
#[cfg(feature = "candle")]
pub use candle_backend::CandleT5Backend;
pub use checkpoint::{Checkpoint, StagedCheckpoint};
pub use driver::{RetrainReport, RetrainingDriver, TrainingInputs};
pub use error::{TrainingError, TrainingResult};
pub use tokenize::{EncodedExample, EncodedPair, Seq2SeqEncoder};

/// Backend for the configured device, or an error when built without candle
pub fn default_backend(device: &str) -> anyhow::Result<Box<dyn FineTuneBackend>> {
    #[cfg(feature = "candle")]
    {
        Ok(Box::new(CandleT5Backend::new(device)?))
    }
    #[cfg(not(feature = "candle"))]
    {
        let _ = device;
        anyhow::bail!("detoxifier was built without the `candle` feature; no training backend available")
    }
}
