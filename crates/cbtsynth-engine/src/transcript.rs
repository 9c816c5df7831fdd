//! The exported transcript of a case: the intake dialogue plus every
//! synthesized session, in order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use cbtsynth_core::ids::CaseId;
use cbtsynth_core::session::{DialogueTurn, SessionRecord};

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptBundle {
    pub case_id: CaseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_path: Option<String>,
    #[serde(default)]
    pub s0_dialogue: Vec<DialogueTurn>,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

impl TranscriptBundle {
    /// Split a committed history into the intake dialogue and the sessions after it.
    pub fn from_history(case_id: CaseId, history: &[SessionRecord], system_prompt_path: Option<String>) -> Self {
        let (s0_dialogue, sessions) = match history.split_first() {
            Some((first, rest)) if first.is_intake() => (first.dialogue.clone(), rest.to_vec()),
            _ => (Vec::new(), history.to_vec()),
        };
        Self {
            case_id,
            system_prompt_path,
            s0_dialogue,
            sessions,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), TranscriptError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TranscriptError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use cbtsynth_store::store::intake_record;

    #[test]
    fn splits_intake_from_sessions() {
        let profile = fixtures::profile("case_00003");
        let s1: SessionRecord = serde_json::from_value(fixtures::session_value(&fixtures::s1_plan())).unwrap();
        let history = vec![intake_record(&profile), s1.clone()];

        let bundle = TranscriptBundle::from_history(profile.id.clone(), &history, None);
        assert_eq!(bundle.s0_dialogue, profile.dialogue);
        assert_eq!(bundle.sessions, vec![s1]);

        let v = serde_json::to_value(&bundle).unwrap();
        assert_eq!(v["case_id"], "case_00003");
        assert!(v.get("system_prompt_path").is_none());
        assert_eq!(v["sessions"][0]["session_id"], "S1");
    }

    #[test]
    fn write_and_load() {
        let dir = std::env::temp_dir().join(format!("cbtsynth-bundle-{}", uuid::Uuid::now_v7()));
        let path = dir.join("nested").join("case.json");
        let profile = fixtures::profile("case_9");
        let bundle = TranscriptBundle::from_history(
            profile.id.clone(),
            &[intake_record(&profile)],
            Some("prompts/custom.md".into()),
        );

        bundle.write(&path).unwrap();
        let loaded = TranscriptBundle::load(&path).unwrap();
        assert_eq!(loaded, bundle);
        assert!(loaded.sessions.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
