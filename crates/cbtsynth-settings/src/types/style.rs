use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Global style rules shared by the prompt composer and the validator.
/// Loaded once and passed around as `Arc<StyleRules>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleRules {
    /// Inclusive bounds on dialogue entries per generated session.
    pub min_turns: usize,
    pub max_turns: usize,
    /// A client turn "vents" when its word count falls in this band.
    pub venting_min_words: usize,
    pub venting_max_words: usize,
    /// A counselor turn "educates" when its word count falls in this band.
    pub education_min_words: usize,
    pub education_max_words: usize,
    /// Counselor turns above this length are flagged as monologues.
    pub counselor_max_words: usize,
    /// Fraction of artifact units that must appear in the dialogue.
    pub overlap_threshold: f64,
    /// Fraction of a unit's content words a turn window must cover.
    pub unit_match_threshold: f64,
    /// Consecutive turns searched together for a paraphrased unit.
    pub overlap_window: usize,
    /// Units with fewer content words are ignored.
    pub min_unit_tokens: usize,
    /// At least one must appear in a counselor turn.
    pub back_reference_phrases: Vec<String>,
    /// "Yes-but" pushback markers for client turns.
    pub resistance_markers: Vec<String>,
    pub min_resistance_turns: usize,
}

impl Default for StyleRules {
    fn default() -> Self {
        Self {
            min_turns: 18,
            max_turns: 28,
            venting_min_words: 60,
            venting_max_words: 250,
            education_min_words: 40,
            education_max_words: 160,
            counselor_max_words: 200,
            overlap_threshold: 0.6,
            unit_match_threshold: 0.6,
            overlap_window: 3,
            min_unit_tokens: 2,
            back_reference_phrases: [
                "last time",
                "last session",
                "last week",
                "you mentioned",
                "you said",
                "you shared",
                "we talked about",
                "we discussed",
                "we worked on",
                "previous session",
                "since we last",
                "when we last",
                "earlier you",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            resistance_markers: [
                "yes, but",
                "yes but",
                "yeah, but",
                "yeah but",
                "i know, but",
                "i know but",
                "i guess, but",
                "maybe, but",
                "but what if",
                "that's easy to say",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            min_resistance_turns: 1,
        }
    }
}

impl StyleRules {
    /// Reject bands and thresholds that no transcript could satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.min_turns == 0 || self.min_turns > self.max_turns {
            return Err(SettingsError::InvalidValue(format!(
                "style turn bounds [{}, {}] are empty",
                self.min_turns, self.max_turns
            )));
        }
        if self.venting_min_words > self.venting_max_words {
            return Err(SettingsError::InvalidValue(
                "style.ventingMinWords exceeds ventingMaxWords".into(),
            ));
        }
        if self.education_min_words > self.education_max_words {
            return Err(SettingsError::InvalidValue(
                "style.educationMinWords exceeds educationMaxWords".into(),
            ));
        }
        for (name, value) in [
            ("overlapThreshold", self.overlap_threshold),
            ("unitMatchThreshold", self.unit_match_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(SettingsError::InvalidValue(format!(
                    "style.{name} must be in (0, 1], got {value}"
                )));
            }
        }
        if self.overlap_window == 0 {
            return Err(SettingsError::InvalidValue("style.overlapWindow must be >= 1".into()));
        }
        if self.back_reference_phrases.is_empty() {
            return Err(SettingsError::InvalidValue(
                "style.backReferencePhrases must not be empty".into(),
            ));
        }
        Ok(())
    }
}
