// Rating curation
//
// Turns raw ratings into a weighted training set: floor ratings are dropped,
// ceiling ratings are replicated, everything in between passes once.

use serde::Serialize;
use tracing::warn;

use crate::config::CurationConfig;
use crate::feedback::{FeedbackRecord, RatingClass, RatingScale};

/// One supervised training example derived from a rating
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CuratedExample {
    /// Encoder input (prompt prefix is added at tokenization)
    pub input_text: String,
    /// Decoder target
    pub target_text: String,
    /// Number of copies of the source record in the curated set
    pub weight: u32,
}

impl CuratedExample {
    pub fn new(input_text: impl Into<String>, target_text: impl Into<String>, weight: u32) -> Self {
        Self {
            input_text: input_text.into(),
            target_text: target_text.into(),
            weight,
        }
    }
}

/// Rating scale plus the replication factor for ceiling ratings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurationPolicy {
    pub scale: RatingScale,
    pub ceiling_replication: u32,
}

impl Default for CurationPolicy {
    fn default() -> Self {
        Self {
            scale: RatingScale::default(),
            ceiling_replication: 3,
        }
    }
}

impl From<&CurationConfig> for CurationPolicy {
    fn from(config: &CurationConfig) -> Self {
        Self {
            scale: RatingScale::from(config),
            ceiling_replication: config.ceiling_replication,
        }
    }
}

/// Curate rated feedback into training examples.
///
/// Ceiling-rated examples come first, then the rest; each group keeps store
/// order. The output depends only on the input, so repeated calls on an
/// unchanged store produce identical sets.
pub fn curate_feedback(records: &[FeedbackRecord], policy: &CurationPolicy) -> Vec<CuratedExample> {
    let mut emphasized = Vec::new();
    let mut kept = Vec::new();

    for record in records {
        match policy.scale.classify(record.rating) {
            RatingClass::Discard => {}
            RatingClass::Keep => kept.push(CuratedExample::new(
                record.source_text.clone(),
                record.generated_text.clone(),
                1,
            )),
            RatingClass::Emphasize => {
                for _ in 0..policy.ceiling_replication {
                    emphasized.push(CuratedExample::new(
                        record.source_text.clone(),
                        record.generated_text.clone(),
                        policy.ceiling_replication,
                    ));
                }
            }
            RatingClass::OutOfRange => warn!(
                rating = record.rating,
                floor = policy.scale.floor,
                ceiling = policy.scale.ceiling,
                "Ignoring rating outside the configured scale"
            ),
        }
    }

    emphasized.extend(kept);
    emphasized
}

/// Breakdown of a curation pass, for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CurationSummary {
    pub records: usize,
    pub emphasized: usize,
    pub kept: usize,
    pub discarded: usize,
    pub out_of_range: usize,
    /// Size of the curated set
    pub examples: usize,
}

impl CurationSummary {
    pub fn of(records: &[FeedbackRecord], policy: &CurationPolicy) -> Self {
        let mut summary = Self {
            records: records.len(),
            ..Self::default()
        };
        for record in records {
            match policy.scale.classify(record.rating) {
                RatingClass::Discard => summary.discarded += 1,
                RatingClass::Keep => summary.kept += 1,
                RatingClass::Emphasize => summary.emphasized += 1,
                RatingClass::OutOfRange => summary.out_of_range += 1,
            }
        }
        summary.examples =
            summary.emphasized * policy.ceiling_replication as usize + summary.kept;
        summary
    }
}
