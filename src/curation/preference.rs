// Preference pair preparation for DPO-style retraining

use serde::Serialize;

use crate::config::PreferenceConfig;
use crate::feedback::PreferenceRecord;

/// Prompt with a preferred and a dispreferred completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreferencePair {
    pub prompt: String,
    pub chosen: String,
    pub rejected: String,
}

/// Handling of the "cannot be rewritten" choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnfixablePolicy {
    /// Chosen text that marks the input as impossible to rewrite
    pub marker: String,
    /// Completion used as `chosen` for marked records
    pub chosen_sentinel: String,
    /// Completion used as `rejected` for marked records
    pub rejected_sentinel: String,
}

impl Default for UnfixablePolicy {
    fn default() -> Self {
        Self::from(&PreferenceConfig::default())
    }
}

impl From<&PreferenceConfig> for UnfixablePolicy {
    fn from(config: &PreferenceConfig) -> Self {
        Self {
            marker: config.unfixable_marker.clone(),
            chosen_sentinel: config.unfixable_chosen.clone(),
            rejected_sentinel: config.unfixable_rejected.clone(),
        }
    }
}

/// Turn stored choices into training pairs.
///
/// Records with an empty prompt, an empty chosen text or no non-empty
/// rejected option are dropped. The first non-empty rejected option is the
/// dispreferred completion. A record whose chosen text is the unfixable
/// marker yields the two sentinel strings instead of its own fields.
pub fn prepare_preferences(
    records: &[PreferenceRecord],
    policy: &UnfixablePolicy,
) -> Vec<PreferencePair> {
    records
        .iter()
        .filter_map(|record| prepare_one(record, policy))
        .collect()
}

fn prepare_one(record: &PreferenceRecord, policy: &UnfixablePolicy) -> Option<PreferencePair> {
    let prompt = record.source_text.trim();
    let chosen = record.chosen_text.trim();
    if prompt.is_empty() || chosen.is_empty() {
        return None;
    }

    let first_rejected = record
        .rejected_texts
        .iter()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())?;

    // TODO: confirm with the product owner whether marked records should
    // keep the user's rejected candidate instead of the fixed sentinel.
    if chosen == policy.marker {
        return Some(PreferencePair {
            prompt: prompt.to_string(),
            chosen: policy.chosen_sentinel.clone(),
            rejected: policy.rejected_sentinel.clone(),
        });
    }

    Some(PreferencePair {
        prompt: prompt.to_string(),
        chosen: chosen.to_string(),
        rejected: first_rejected.to_string(),
    })
}
