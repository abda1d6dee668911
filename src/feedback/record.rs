// Feedback record types
//
// Field names on disk match the JSON objects the web demo has always written
// (`toxic`, `detoxified`, `rating` / `toxic`, `chosen`, `rejected`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CurationConfig;

/// A single user rating of one generated rewrite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Text the user asked to rewrite
    #[serde(rename = "toxic")]
    pub source_text: String,

    /// Rewrite shown to the user
    #[serde(rename = "detoxified")]
    pub generated_text: String,

    /// Rating on the configured scale
    pub rating: u8,

    /// When the rating was submitted (absent in legacy records)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl FeedbackRecord {
    /// Create a record stamped with the current time. Texts are trimmed.
    pub fn new(source_text: &str, generated_text: &str, rating: u8) -> Self {
        Self {
            source_text: source_text.trim().to_string(),
            generated_text: generated_text.trim().to_string(),
            rating,
            recorded_at: Some(Utc::now()),
        }
    }
}

/// A user's pick among several generated candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    #[serde(rename = "toxic")]
    pub source_text: String,

    /// Candidate the user selected
    #[serde(rename = "chosen")]
    pub chosen_text: String,

    /// Remaining candidates, in presentation order
    #[serde(rename = "rejected", default)]
    pub rejected_texts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl PreferenceRecord {
    pub fn new(source_text: &str, chosen_text: &str, rejected_texts: Vec<String>) -> Self {
        Self {
            source_text: source_text.trim().to_string(),
            chosen_text: chosen_text.trim().to_string(),
            rejected_texts,
            recorded_at: Some(Utc::now()),
        }
    }

    /// Build a record from the candidates shown to the user.
    ///
    /// Every option that differs from `chosen` becomes a rejected text.
    /// Returns `None` when no option is left to reject.
    pub fn from_choice(source_text: &str, chosen_text: &str, options: &[String]) -> Option<Self> {
        let chosen = chosen_text.trim();
        let rejected: Vec<String> = options
            .iter()
            .map(|option| option.trim())
            .filter(|option| *option != chosen)
            .map(str::to_string)
            .collect();

        if rejected.is_empty() {
            return None;
        }
        Some(Self::new(source_text, chosen, rejected))
    }
}

/// How the curation policy treats a rating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingClass {
    /// At the floor: never trained on
    Discard,
    /// Strictly between floor and ceiling: trained on once
    Keep,
    /// At the ceiling: replicated for emphasis
    Emphasize,
    /// Outside the scale altogether
    OutOfRange,
}

/// Bounded rating scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatingScale {
    pub floor: u8,
    pub ceiling: u8,
}

impl Default for RatingScale {
    fn default() -> Self {
        Self { floor: 1, ceiling: 5 }
    }
}

impl From<&CurationConfig> for RatingScale {
    fn from(config: &CurationConfig) -> Self {
        Self {
            floor: config.rating_floor,
            ceiling: config.rating_ceiling,
        }
    }
}

impl RatingScale {
    pub fn contains(&self, rating: u8) -> bool {
        (self.floor..=self.ceiling).contains(&rating)
    }

    pub fn classify(&self, rating: u8) -> RatingClass {
        if !self.contains(rating) {
            RatingClass::OutOfRange
        } else if rating == self.floor {
            RatingClass::Discard
        } else if rating == self.ceiling {
            RatingClass::Emphasize
        } else {
            RatingClass::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_record_uses_legacy_keys() {
        let record = FeedbackRecord {
            source_text: "you idiot".to_string(),
            generated_text: "you are mistaken".to_string(),
            rating: 4,
            recorded_at: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["toxic"], "you idiot");
        assert_eq!(json["detoxified"], "you are mistaken");
        assert_eq!(json["rating"], 4);
        assert!(json.get("recorded_at").is_none());
    }

    #[test]
    fn test_legacy_preference_without_timestamp_parses() {
        let record: PreferenceRecord = serde_json::from_str(
            r#"{"toxic": "shut up", "chosen": "please stop", "rejected": ["be quiet", "hush"]}"#,
        )
        .unwrap();
        assert_eq!(record.chosen_text, "please stop");
        assert_eq!(record.rejected_texts, vec!["be quiet", "hush"]);
        assert!(record.recorded_at.is_none());
    }

    #[test]
    fn test_from_choice_rejects_everything_else() {
        let options = vec![
            "please stop".to_string(),
            "be quiet".to_string(),
            "hush".to_string(),
        ];
        let record = PreferenceRecord::from_choice(" shut up ", "be quiet", &options).unwrap();
        assert_eq!(record.source_text, "shut up");
        assert_eq!(record.rejected_texts, vec!["please stop", "hush"]);
    }

    #[test]
    fn test_from_choice_needs_a_rejected_option() {
        let options = vec!["please stop".to_string(), "please stop".to_string()];
        assert!(PreferenceRecord::from_choice("shut up", "please stop", &options).is_none());
    }

    #[test]
    fn test_rating_scale_classes() {
        let scale = RatingScale::default();
        assert_eq!(scale.classify(1), RatingClass::Discard);
        assert_eq!(scale.classify(2), RatingClass::Keep);
        assert_eq!(scale.classify(4), RatingClass::Keep);
        assert_eq!(scale.classify(5), RatingClass::Emphasize);
        assert_eq!(scale.classify(0), RatingClass::OutOfRange);
        assert_eq!(scale.classify(6), RatingClass::OutOfRange);
    }
}
