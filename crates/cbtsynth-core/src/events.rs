use serde::{Deserialize, Serialize};

use crate::ids::CaseId;
use crate::session::SessionNumber;

/// Lifecycle events emitted while synthesizing a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SynthesisEvent {
    #[serde(rename = "plan_selected")]
    PlanSelected {
        case_id: CaseId,
        session_id: SessionNumber,
        stage: String,
        repeated: bool,
    },

    #[serde(rename = "attempt_started")]
    AttemptStarted {
        case_id: CaseId,
        session_id: SessionNumber,
        attempt: u32,
        repair: bool,
    },

    #[serde(rename = "attempt_rejected")]
    AttemptRejected {
        case_id: CaseId,
        session_id: SessionNumber,
        attempt: u32,
        failed_rules: Vec<String>,
    },

    #[serde(rename = "generation_failed")]
    GenerationFailed {
        case_id: CaseId,
        session_id: SessionNumber,
        attempt: u32,
        error_kind: String,
        message: String,
    },

    #[serde(rename = "session_committed")]
    SessionCommitted {
        case_id: CaseId,
        session_id: SessionNumber,
        attempts: u32,
        warnings: usize,
    },

    #[serde(rename = "synthesis_aborted")]
    SynthesisAborted {
        case_id: CaseId,
        session_id: SessionNumber,
        attempts: u32,
        reason: String,
    },
}

impl SynthesisEvent {
    pub fn case_id(&self) -> &CaseId {
        match self {
            Self::PlanSelected { case_id, .. }
            | Self::AttemptStarted { case_id, .. }
            | Self::AttemptRejected { case_id, .. }
            | Self::GenerationFailed { case_id, .. }
            | Self::SessionCommitted { case_id, .. }
            | Self::SynthesisAborted { case_id, .. } => case_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PlanSelected { .. } => "plan_selected",
            Self::AttemptStarted { .. } => "attempt_started",
            Self::AttemptRejected { .. } => "attempt_rejected",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::SessionCommitted { .. } => "session_committed",
            Self::SynthesisAborted { .. } => "synthesis_aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionCommitted { .. } | Self::SynthesisAborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_serialization() {
        let event = SynthesisEvent::SessionCommitted {
            case_id: CaseId::from_raw("case_1"),
            session_id: SessionNumber::new(2),
            attempts: 1,
            warnings: 0,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "session_committed");
        assert_eq!(v["session_id"], "S2");
        assert_eq!(event.event_type(), "session_committed");
        assert!(event.is_terminal());
        assert_eq!(event.case_id().as_str(), "case_1");
    }
}
