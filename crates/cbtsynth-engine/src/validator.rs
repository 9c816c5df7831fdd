//! Parse, then run every rule. Pure: the same text and context always
//! produce the same report.

use std::sync::Arc;

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::constraint::{ConstraintResult, Severity, ValidationReport, ViolationKind};
use cbtsynth_core::facts::KnownFacts;
use cbtsynth_core::session::{Artifact, DialogueTurn, SessionRecord};
use cbtsynth_core::stage::StagePlan;
use cbtsynth_settings::StyleRules;

use crate::candidate::Candidate;
use crate::constraints::{CheckContext, ConstraintRegistry};

pub const PARSE_RULE: &str = "parse.json";

/// Outcome of validating one generator output.
#[derive(Clone, Debug, PartialEq)]
pub struct Validation {
    pub report: ValidationReport,
    /// Set only when every hard rule passed.
    pub record: Option<SessionRecord>,
}

impl Validation {
    pub fn passed(&self) -> bool {
        self.record.is_some()
    }
}

pub struct Validator {
    registry: Arc<ConstraintRegistry>,
    style: Arc<StyleRules>,
}

impl Validator {
    pub fn new(registry: Arc<ConstraintRegistry>, style: Arc<StyleRules>) -> Self {
        Self { registry, style }
    }

    pub fn registry(&self) -> &ConstraintRegistry {
        &self.registry
    }

    pub fn validate(
        &self,
        text: &str,
        profile: &CaseProfile,
        history: &[SessionRecord],
        plan: &StagePlan,
    ) -> Validation {
        let candidate = match Candidate::parse(text) {
            Ok(c) => c,
            Err(e) => {
                // Nothing else can be judged without an object.
                let result = ConstraintResult::fail(PARSE_RULE, ViolationKind::Parse, Severity::Hard, e.to_string());
                return Validation {
                    report: ValidationReport::new(vec![result]),
                    record: None,
                };
            }
        };

        let known = KnownFacts::from_history(profile, history);
        let ctx = CheckContext {
            profile,
            history,
            plan,
            style: &self.style,
            known: &known,
        };
        let mut results = vec![ConstraintResult::pass(
            PARSE_RULE,
            ViolationKind::Parse,
            Severity::Hard,
            "JSON object parsed",
        )];
        results.extend(self.registry.evaluate(&candidate, &ctx).results);
        let report = ValidationReport::new(results);

        let record = report.passed().then(|| to_record(&candidate, plan)).flatten();
        Validation { report, record }
    }
}

/// Committed records carry the plan's canonical labels.
fn to_record(candidate: &Candidate, plan: &StagePlan) -> Option<SessionRecord> {
    let dialogue = candidate
        .turns
        .iter()
        .map(|t| {
            t.role().map(|role| DialogueTurn {
                role,
                content: t.content.trim().to_string(),
            })
        })
        .collect::<Option<Vec<_>>>()?;
    let objective = candidate
        .stage_objective
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .unwrap_or(&plan.stage_objective);

    Some(SessionRecord {
        session_id: plan.session_id,
        stage: plan.stage.clone(),
        stage_objective: objective.to_string(),
        artifact: Artifact {
            kind: plan.artifact_type.clone(),
            content: candidate.artifact_text().trim().to_string(),
        },
        dialogue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn validator() -> Validator {
        Validator::new(Arc::new(ConstraintRegistry::standard()), Arc::new(StyleRules::default()))
    }

    #[test]
    fn valid_session_yields_record() {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::s1_plan();
        let v = validator().validate(&fixtures::session_json(&plan), &profile, &[], &plan);
        assert!(v.report.passed(), "{:?}", v.report.failed_rule_ids());
        assert_eq!(v.report.warnings().count(), 0);
        let record = v.record.unwrap();
        assert_eq!(record.session_id, plan.session_id);
        assert_eq!(record.dialogue.len(), 21);
        assert_eq!(record.artifact.kind, "Trigger/Thought Log");
    }

    #[test]
    fn psychoeducation_scenario_passes() {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::psychoeducation_plan();
        let v = validator().validate(&fixtures::session_json(&plan), &profile, &[], &plan);
        assert!(v.passed(), "{:?}", v.report.failed_rule_ids());
        assert_eq!(v.record.unwrap().artifact.kind, "thought_record");
    }

    #[test]
    fn prose_fails_parse_only() {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::s1_plan();
        let v = validator().validate("Sorry, I can't help with that.", &profile, &[], &plan);
        assert!(!v.passed());
        assert_eq!(v.report.results.len(), 1);
        assert_eq!(v.report.results[0].rule_id, PARSE_RULE);
        assert!(v.report.has_kind(ViolationKind::Parse));
    }

    #[test]
    fn every_rule_reports_without_short_circuit() {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::s1_plan();
        let mut value = fixtures::session_value(&plan);
        value["session_id"] = "S9".into();
        value["dialogue"].as_array_mut().unwrap().truncate(4);
        let v = validator().validate(&value.to_string(), &profile, &[], &plan);
        assert_eq!(v.report.results.len(), 1 + ConstraintRegistry::standard().count());
        let failed = v.report.failed_rule_ids();
        assert!(failed.contains(&"structure.session_id".to_string()));
        assert!(failed.contains(&"structure.turn_count".to_string()));
        assert!(failed.contains(&"structure.alternation".to_string()));
        assert!(v.record.is_none());
    }

    #[test]
    fn fenced_output_is_rejected_but_fully_judged() {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::s1_plan();
        let text = format!("```json\n{}\n```", fixtures::session_json(&plan));
        let v = validator().validate(&text, &profile, &[], &plan);
        assert_eq!(v.report.failed_rule_ids(), vec!["structure.bare_json".to_string()]);
        assert!(!v.passed());
    }

    #[test]
    fn family_details_are_not_persona_claims() {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::s1_plan();
        for line in [
            "Okay. I also have an 8-year-old at home, so mornings are hectic. Where do I start?",
            "Okay. Daniel works as an engineer, so he gets weekends off.",
        ] {
            let mut value = fixtures::session_value(&plan);
            value["dialogue"][9]["content"] = line.into();
            let v = validator().validate(&value.to_string(), &profile, &[], &plan);
            assert!(v.report.failed_rule_ids().is_empty(), "{line}: {:?}", v.report.failed_rule_ids());
        }
    }

    #[test]
    fn validation_is_deterministic() {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::s1_plan();
        let mut value = fixtures::session_value(&plan);
        value["dialogue"][1]["content"] = "As a teacher I never rest.".into();
        let text = value.to_string();
        let validator = validator();
        let a = validator.validate(&text, &profile, &[], &plan);
        let b = validator.validate(&text, &profile, &[], &plan);
        assert_eq!(a, b);
        assert!(a.report.has_kind(ViolationKind::Continuity));
    }
}
