use cbtsynth_core::constraint::{ConstraintResult, ValidationReport};
use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::ids::AttemptId;
use cbtsynth_core::prompt::PromptRequest;
use cbtsynth_core::session::SessionRecord;

/// One generation call and everything learned from it. Each attempt is a
/// fresh value that carries its predecessor's violations.
#[derive(Clone, Debug)]
pub struct GenerationAttempt {
    pub id: AttemptId,
    /// 1-based; counts every generation call for the session.
    pub number: u32,
    pub prompt: PromptRequest,
    pub raw_text: Option<String>,
    pub report: Option<ValidationReport>,
    pub record: Option<SessionRecord>,
    pub error: Option<GenerationError>,
    pub prior_violations: Vec<ConstraintResult>,
}

impl GenerationAttempt {
    pub fn first(prompt: PromptRequest) -> Self {
        Self {
            id: AttemptId::new(),
            number: 1,
            prompt,
            raw_text: None,
            report: None,
            record: None,
            error: None,
            prior_violations: Vec::new(),
        }
    }

    /// Successor attempt. Violations roll forward past attempts that produced
    /// no output.
    pub fn next(&self, prompt: PromptRequest) -> Self {
        Self {
            id: AttemptId::new(),
            number: self.number + 1,
            prompt,
            raw_text: None,
            report: None,
            record: None,
            error: None,
            prior_violations: match &self.report {
                Some(report) => report.failures().cloned().collect(),
                None => self.prior_violations.clone(),
            },
        }
    }

    pub fn with_output(self, text: String, report: ValidationReport, record: Option<SessionRecord>) -> Self {
        Self {
            raw_text: Some(text),
            report: Some(report),
            record,
            ..self
        }
    }

    pub fn with_error(self, error: GenerationError) -> Self {
        Self {
            error: Some(error),
            ..self
        }
    }

    pub fn is_repair(&self) -> bool {
        !self.prior_violations.is_empty()
    }

    pub fn violations(&self) -> Vec<&ConstraintResult> {
        self.report.iter().flat_map(|r| r.failures()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbtsynth_core::constraint::{Severity, ViolationKind};

    fn report() -> ValidationReport {
        ValidationReport::new(vec![
            ConstraintResult::pass("a", ViolationKind::Structural, Severity::Hard, "ok"),
            ConstraintResult::fail("b", ViolationKind::Overlap, Severity::Hard, "20%"),
        ])
    }

    #[test]
    fn violations_roll_forward() {
        let first = GenerationAttempt::first(PromptRequest::empty());
        assert!(!first.is_repair());
        let first = first.with_output("{}".into(), report(), None);
        assert_eq!(first.violations().len(), 1);

        let second = first.next(PromptRequest::empty());
        assert_eq!(second.number, 2);
        assert!(second.is_repair());
        assert_eq!(second.prior_violations[0].rule_id, "b");
        assert_ne!(second.id, first.id);

        // A transport failure produces no report; the old violations survive.
        let second = second.with_error(GenerationError::EmptyResponse);
        let third = second.next(PromptRequest::empty());
        assert_eq!(third.number, 3);
        assert_eq!(third.prior_violations.len(), 1);
    }
}
