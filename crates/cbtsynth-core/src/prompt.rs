use serde::{Deserialize, Serialize};

/// The complete request handed to a generator. System blocks carry standing
/// instructions; sections carry the per-session material.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub system_blocks: Vec<PromptBlock>,
    pub sections: Vec<PromptBlock>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBlock {
    pub label: BlockLabel,
    pub content: String,
}

/// Labels for tracking what's in the request (debugging, size attribution).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockLabel {
    CorePrompt,
    StyleRules,
    TargetStage,
    CaseProfile,
    IntakeTranscript,
    PriorSessions,
    Constraints,
    PreviousAttempt,
    RepairDirectives,
    OutputContract,
    Custom(String),
}

impl BlockLabel {
    pub fn heading(&self) -> &str {
        match self {
            Self::CorePrompt => "CORE",
            Self::StyleRules => "STYLE RULES",
            Self::TargetStage => "TARGET STAGE",
            Self::CaseProfile => "CASE",
            Self::IntakeTranscript => "INTAKE TRANSCRIPT (S0)",
            Self::PriorSessions => "PRIOR SESSIONS",
            Self::Constraints => "CONSTRAINTS",
            Self::PreviousAttempt => "PREVIOUS ATTEMPT",
            Self::RepairDirectives => "REQUIRED FIXES",
            Self::OutputContract => "OUTPUT FORMAT",
            Self::Custom(name) => name,
        }
    }
}

impl PromptRequest {
    /// Create an empty request (useful for testing).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, label: BlockLabel, content: impl Into<String>) {
        self.system_blocks.push(PromptBlock {
            label,
            content: content.into(),
        });
    }

    /// Empty sections are skipped.
    pub fn push_section(&mut self, label: BlockLabel, content: impl Into<String>) {
        let content = content.into();
        if content.trim().is_empty() {
            return;
        }
        self.sections.push(PromptBlock { label, content });
    }

    pub fn section(&self, label: &BlockLabel) -> Option<&PromptBlock> {
        self.sections.iter().find(|b| &b.label == label)
    }

    pub fn system_text(&self) -> String {
        self.system_blocks
            .iter()
            .map(|b| b.content.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Render sections as `HEADING:` blocks separated by blank lines.
    pub fn user_text(&self) -> String {
        self.sections
            .iter()
            .map(|b| format!("{}:\n{}", b.label.heading(), b.content.trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn char_len(&self) -> usize {
        self.system_blocks
            .iter()
            .chain(&self.sections)
            .map(|b| b.content.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sections_with_headings() {
        let mut req = PromptRequest::empty();
        req.push_system(BlockLabel::CorePrompt, "You write sessions.");
        req.push_section(BlockLabel::TargetStage, "S1 Build Trust");
        req.push_section(BlockLabel::Constraints, "1. [HARD] ...");
        assert_eq!(req.system_text(), "You write sessions.");
        let user = req.user_text();
        assert!(user.starts_with("TARGET STAGE:\nS1 Build Trust"));
        assert!(user.contains("\n\nCONSTRAINTS:\n1. [HARD]"));
    }

    #[test]
    fn empty_sections_are_skipped() {
        let mut req = PromptRequest::empty();
        req.push_section(BlockLabel::PriorSessions, "   ");
        assert!(req.sections.is_empty());
        assert!(req.section(&BlockLabel::PriorSessions).is_none());
    }

    #[test]
    fn custom_label_heading() {
        let label = BlockLabel::Custom("NOTES".into());
        assert_eq!(label.heading(), "NOTES");
        let json = serde_json::to_string(&label).unwrap();
        let parsed: BlockLabel = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, label);
    }
}
