use serde::{Deserialize, Serialize};

use crate::session::SessionNumber;

/// Numeric quotas a session must meet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTargets {
    /// Client turns that fall inside the venting word band.
    pub min_venting_turns: u32,
    /// Counselor turns inside the educational word band. Only checked
    /// when the stage introduces a concept.
    pub min_educational_turns: u32,
    pub introduces_concept: bool,
}

impl Default for StageTargets {
    fn default() -> Self {
        Self {
            min_venting_turns: 1,
            min_educational_turns: 1,
            introduces_concept: false,
        }
    }
}

/// What the next session must accomplish. Derived, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub session_id: SessionNumber,
    pub stage: String,
    pub stage_objective: String,
    pub artifact_type: String,
    /// Free-text shape requirements for the artifact.
    #[serde(default)]
    pub artifact_requirements: String,
    #[serde(default)]
    pub targets: StageTargets,
    /// Set when the planner repeats a stage because homework was left incomplete.
    #[serde(default)]
    pub repeated: bool,
}

impl StagePlan {
    pub fn new(
        session_id: SessionNumber,
        stage: impl Into<String>,
        stage_objective: impl Into<String>,
        artifact_type: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            stage: stage.into(),
            stage_objective: stage_objective.into(),
            artifact_type: artifact_type.into(),
            artifact_requirements: String::new(),
            targets: StageTargets::default(),
            repeated: false,
        }
    }

    pub fn with_targets(mut self, targets: StageTargets) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        self.artifact_requirements = requirements.into();
        self
    }
}

/// Loose label comparison for stage names and artifact types:
/// case, punctuation and spacing are ignored.
pub fn labels_match(a: &str, b: &str) -> bool {
    fn fold(s: &str) -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    }
    let (a, b) = (fold(a), fold(b));
    !a.is_empty() && a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let plan = StagePlan::new(SessionNumber::new(1), "psychoeducation", "introduce cognitive distortions", "thought_record")
            .with_targets(StageTargets {
                introduces_concept: true,
                ..Default::default()
            });
        assert_eq!(plan.session_id.to_string(), "S1");
        assert!(plan.targets.introduces_concept);
        assert!(!plan.repeated);
    }

    #[test]
    fn labels_match_ignores_case_and_punctuation() {
        assert!(labels_match("thought_record", "Thought Record"));
        assert!(labels_match("Replacement Script + If–Then Plan", "replacement script if-then plan"));
        assert!(!labels_match("CBT Map", "Reality Test Table"));
        assert!(!labels_match("", ""));
    }
}
