// Curation module
// Rated feedback → weighted examples, choices → preference pairs, TSV corpus loading

pub mod dataset;
mod filter;
mod preference;

pub use filter::{curate_feedback, CuratedExample, CurationPolicy, CurationSummary};
pub use preference::{prepare_preferences, PreferencePair, UnfixablePolicy};
