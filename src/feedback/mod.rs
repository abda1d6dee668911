// Feedback module
// Rating and preference records plus their append-only stores

mod record;
mod store;

pub use record::{FeedbackRecord, PreferenceRecord, RatingClass, RatingScale};
pub use store::{FeedbackStore, PreferenceStore, RecordStore};
