// Detoxifier - seq2seq text detoxification with feedback-driven retraining
// Library exports

pub mod config;
pub mod curation;
pub mod feedback;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod server;
pub mod training;
