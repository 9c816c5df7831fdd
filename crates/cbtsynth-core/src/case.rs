use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::CaseId;
use crate::session::{DialogueTurn, Role};

/// Demographic facts about the client. Everything the continuity checks
/// treat as ground truth lives here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub name: String,
    #[serde(deserialize_with = "lenient_age")]
    pub age: Option<u32>,
    pub gender: String,
    pub occupation: String,
    pub education: String,
    pub marital_status: String,
    pub family_details: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeForm {
    pub client_info: ClientInfo,
    pub presenting_problem: Vec<String>,
    pub reason_for_seeking_counseling: String,
    pub past_history: Vec<String>,
    pub academic_occupational_functioning_level: Vec<String>,
    pub social_support_system: String,
}

/// Immutable persona and clinical context for one case.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseProfile {
    #[serde(default)]
    pub id: CaseId,
    #[serde(default)]
    pub intake_form: IntakeForm,
    /// Core automatic thought.
    #[serde(default)]
    pub thought: String,
    /// Cognitive distortion patterns.
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub cbt_technique: String,
    /// Numbered plan steps, keyed "1", "2", ...
    #[serde(default)]
    pub cbt_plan: BTreeMap<String, String>,
    #[serde(default)]
    pub attitude: String,
    /// Intake (S0) conversation.
    #[serde(default, deserialize_with = "lenient_dialogue")]
    pub dialogue: Vec<DialogueTurn>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaseLoadError {
    #[error("failed to read case file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid case JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CaseProfile {
    /// Parse a case document, assigning `id` when the document carries none.
    pub fn from_json_str(id: CaseId, raw: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(raw)?;
        if let Some(obj) = value.as_object_mut() {
            obj.entry("id")
                .or_insert_with(|| serde_json::Value::String(id.as_str().to_string()));
        }
        serde_json::from_value(value)
    }

    /// Load a case file. The file stem becomes the case id unless the
    /// document names one.
    pub fn load(path: &Path) -> Result<Self, CaseLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CaseLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "case".to_string());
        Self::from_json_str(CaseId::from_raw(stem), &raw).map_err(|source| CaseLoadError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn client(&self) -> &ClientInfo {
        &self.intake_form.client_info
    }

    /// Short summary used as the intake artifact.
    pub fn intake_summary(&self) -> String {
        let form = &self.intake_form;
        let mut lines = Vec::new();
        for problem in &form.presenting_problem {
            lines.push(format!("- {problem}"));
        }
        if !form.reason_for_seeking_counseling.is_empty() {
            lines.push(format!("Reason: {}", form.reason_for_seeking_counseling));
        }
        if !self.thought.is_empty() {
            lines.push(format!("Core thought: {}", self.thought));
        }
        lines.join("\n")
    }
}

fn lenient_age<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Intake transcripts come from third-party data. Unknown speakers are dropped
/// and therapist/patient aliases are mapped.
fn lenient_dialogue<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<DialogueTurn>, D::Error> {
    #[derive(Deserialize)]
    struct RawTurn {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: String,
    }

    let raw: Vec<RawTurn> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|t| {
            let role = Role::from_alias(&t.role)?;
            let content = t.content.trim();
            (!content.is_empty()).then(|| DialogueTurn {
                role,
                content: content.to_string(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASE_JSON: &str = r#"{
        "thought": "I will never be good enough at my job.",
        "patterns": ["catastrophizing", "labeling"],
        "intake_form": {
            "client_info": {
                "name": "Maya Thompson",
                "age": "34",
                "gender": "female",
                "occupation": "Nurse",
                "education": "BSN",
                "marital_status": "Single",
                "family_details": "Lives alone, close to her sister Dana"
            },
            "presenting_problem": ["Persistent worry about mistakes at work"],
            "reason_for_seeking_counseling": "Anxiety is affecting sleep.",
            "past_history": [],
            "academic_occupational_functioning_level": ["Works night shifts"],
            "social_support_system": "Sister and two friends."
        },
        "cbt_technique": "Decatastrophizing",
        "cbt_plan": {"1": "Identify the feared outcome", "2": "Estimate likelihood"},
        "attitude": "positive",
        "dialogue": [
            {"role": "Counselor", "content": "What brings you in?"},
            {"role": "Patient", "content": "I keep worrying at work."},
            {"role": "Unknown", "content": "(static)"}
        ]
    }"#;

    #[test]
    fn parse_case_document() {
        let case = CaseProfile::from_json_str(CaseId::from_raw("case_00001"), CASE_JSON).unwrap();
        assert_eq!(case.id.as_str(), "case_00001");
        assert_eq!(case.client().age, Some(34));
        assert_eq!(case.client().occupation, "Nurse");
        assert_eq!(case.cbt_plan.len(), 2);
        assert_eq!(case.dialogue.len(), 2);
        assert_eq!(case.dialogue[1].role, Role::Client);
    }

    #[test]
    fn explicit_id_wins() {
        let case = CaseProfile::from_json_str(CaseId::from_raw("fallback"), r#"{"id":"mine"}"#).unwrap();
        assert_eq!(case.id.as_str(), "mine");
    }

    #[test]
    fn non_numeric_age_is_unknown() {
        let info: ClientInfo = serde_json::from_str(r#"{"age":"mid thirties"}"#).unwrap();
        assert_eq!(info.age, None);
    }

    #[test]
    fn load_uses_file_stem() {
        let dir = std::env::temp_dir().join(format!("cbtsynth-case-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("case_00077.json");
        std::fs::write(&path, CASE_JSON).unwrap();

        let case = CaseProfile::load(&path).unwrap();
        assert_eq!(case.id.as_str(), "case_00077");
        assert!(case.intake_summary().contains("Persistent worry"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = CaseProfile::load(Path::new("/nonexistent/case.json")).unwrap_err();
        assert!(matches!(err, CaseLoadError::Io { .. }));
    }
}
