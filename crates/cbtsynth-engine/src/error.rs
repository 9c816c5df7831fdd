use std::fmt;

use cbtsynth_core::constraint::ValidationReport;
use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::ids::CaseId;
use cbtsynth_core::session::SessionNumber;
use cbtsynth_store::StoreError;

/// History that the planner cannot continue from.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    #[error("history is empty; the case has no intake record")]
    EmptyHistory,

    #[error("first history record is {0}, expected the intake S0")]
    MissingIntake(SessionNumber),

    #[error("history is not contiguous: expected {expected}, found {found}")]
    NonContiguous {
        expected: SessionNumber,
        found: SessionNumber,
    },

    #[error("{session} completed stage {stage:?} with artifact {found:?}, expected {expected:?}")]
    ArtifactMismatch {
        session: SessionNumber,
        stage: String,
        expected: String,
        found: String,
    },

    #[error("{session} is stage {stage:?}, but the arc expected {expected:?}")]
    OutOfOrder {
        session: SessionNumber,
        stage: String,
        expected: String,
    },
}

/// Budget exhausted without a committable candidate.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisFailure {
    pub case_id: CaseId,
    pub session_id: SessionNumber,
    pub attempts: u32,
    pub last_report: Option<ValidationReport>,
    pub last_generation_error: Option<GenerationError>,
}

impl SynthesisFailure {
    pub fn failed_rules(&self) -> Vec<String> {
        self.last_report
            .as_ref()
            .map(|r| r.blocking().map(|c| c.rule_id.clone()).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for SynthesisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} failed after {} attempt(s)",
            self.case_id, self.session_id, self.attempts
        )?;
        let rules = self.failed_rules();
        if !rules.is_empty() {
            write!(f, "; failing rules: {}", rules.join(", "))?;
        }
        if let Some(err) = &self.last_generation_error {
            write!(f, "; last generation error: {err}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis failed: {0}")]
    Failure(Box<SynthesisFailure>),

    #[error("planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("sequence error: expected S{expected}, got S{found}")]
    Sequence { expected: u32, found: u32 },

    /// Only fatal generation errors surface here; retryable ones consume budget.
    #[error("generation error: {0}")]
    Generation(GenerationError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("arc complete for {0}")]
    ArcComplete(CaseId),

    #[error("synthesis cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<StoreError> for SynthesisError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Sequence { expected, found } => Self::Sequence { expected, found },
            other => Self::Store(other),
        }
    }
}

impl SynthesisError {
    pub fn failure(&self) -> Option<&SynthesisFailure> {
        match self {
            Self::Failure(f) => Some(f),
            _ => None,
        }
    }
}
