// Generation models
// Sampling, the generator seam and the Candle T5 implementation

#[cfg(feature = "candle")]
mod device;
mod generator;
mod sampling;
#[cfg(feature = "candle")]
mod t5;

#[cfg(feature = "candle")]
pub use device::select_device;
pub use generator::TextGenerator;
pub use sampling::{max_new_tokens, NucleusSampler, SamplingParams};
#[cfg(feature = "candle")]
pub use t5::T5Generator;
