//! Quotas over turn lengths and client behavior.

use std::sync::Arc;

use cbtsynth_core::constraint::{ConstraintResult, Severity, ViolationKind};
use cbtsynth_core::session::Role;
use cbtsynth_core::stage::StagePlan;
use cbtsynth_core::text::{normalize, word_count};
use cbtsynth_settings::StyleRules;

use super::{excerpt, CheckContext, Constraint};
use crate::candidate::Candidate;

pub fn rules() -> Vec<Arc<dyn Constraint>> {
    vec![
        Arc::new(Venting),
        Arc::new(Psychoeducation),
        Arc::new(TurnLength),
        Arc::new(Resistance),
    ]
}

fn count_in_band(candidate: &Candidate, role: Role, min: usize, max: usize) -> usize {
    candidate
        .turns_by(role)
        .filter(|t| (min..=max).contains(&word_count(&t.content)))
        .count()
}

/// Client turns long enough to count as venting.
pub struct Venting;

impl Constraint for Venting {
    fn id(&self) -> &'static str {
        "stats.venting"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Statistical
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, style: &StyleRules, plan: &StagePlan) -> String {
        format!(
            "At least {} Client turn(s) of {}-{} words where the Client vents about a concrete recent situation.",
            plan.targets.min_venting_turns, style.venting_min_words, style.venting_max_words
        )
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let found = count_in_band(candidate, Role::Client, ctx.style.venting_min_words, ctx.style.venting_max_words);
        let need = ctx.plan.targets.min_venting_turns as usize;
        let detail = format!(
            "{found} venting turn(s) of {}-{} words, need {need}",
            ctx.style.venting_min_words, ctx.style.venting_max_words
        );
        if found >= need {
            self.pass(detail)
        } else {
            self.fail(detail)
        }
    }
}

/// Counselor explanations sized for teaching a concept.
pub struct Psychoeducation;

impl Constraint for Psychoeducation {
    fn id(&self) -> &'static str {
        "stats.psychoeducation"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Statistical
    }
    fn severity(&self) -> Severity {
        Severity::Soft
    }
    fn instruction(&self, style: &StyleRules, plan: &StagePlan) -> String {
        if plan.targets.introduces_concept {
            format!(
                "Introduce this stage's CBT concept in at least {} Counselor turn(s) of {}-{} words, with an example from the Client's life.",
                plan.targets.min_educational_turns, style.education_min_words, style.education_max_words
            )
        } else {
            "Keep Counselor explanations short and tied to the Client's examples.".into()
        }
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        if !ctx.plan.targets.introduces_concept {
            return self.pass("stage introduces no concept".into());
        }
        let found = count_in_band(
            candidate,
            Role::Counselor,
            ctx.style.education_min_words,
            ctx.style.education_max_words,
        );
        let need = ctx.plan.targets.min_educational_turns as usize;
        let detail = format!("{found} educational turn(s), need {need}");
        if found >= need {
            self.pass(detail)
        } else {
            self.fail(detail)
        }
    }
}

/// No counselor monologues.
pub struct TurnLength;

impl Constraint for TurnLength {
    fn id(&self) -> &'static str {
        "stats.turn_length"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Statistical
    }
    fn severity(&self) -> Severity {
        Severity::Soft
    }
    fn instruction(&self, style: &StyleRules, _plan: &StagePlan) -> String {
        format!("No Counselor turn longer than {} words.", style.counselor_max_words)
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let long: Vec<String> = candidate
            .turns_by(Role::Counselor)
            .filter(|t| word_count(&t.content) > ctx.style.counselor_max_words)
            .map(|t| format!("{} words: {}", word_count(&t.content), excerpt(&t.content)))
            .collect();
        if long.is_empty() {
            self.pass("no monologues".into())
        } else {
            self.fail(format!("{} counselor monologue(s)", long.len())).with_evidence(long)
        }
    }
}

/// "Yes, but" pushback from the client.
pub struct Resistance;

impl Constraint for Resistance {
    fn id(&self) -> &'static str {
        "stats.resistance"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Statistical
    }
    fn severity(&self) -> Severity {
        Severity::Soft
    }
    fn instruction(&self, style: &StyleRules, _plan: &StagePlan) -> String {
        format!(
            "The Client pushes back at least {} time(s) (\"yes, but...\") before accepting a reframe.",
            style.min_resistance_turns
        )
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let markers: Vec<String> = ctx
            .style
            .resistance_markers
            .iter()
            .map(|m| normalize(m))
            .filter(|m| !m.is_empty())
            .collect();
        let found: Vec<String> = candidate
            .turns_by(Role::Client)
            .filter(|t| {
                let text = normalize(&t.content.replace('\u{2019}', "'"));
                markers.iter().any(|m| contains_phrase(&text, m))
            })
            .map(|t| excerpt(&t.content))
            .collect();
        let need = ctx.style.min_resistance_turns;
        let detail = format!("{} pushback turn(s), need {need}", found.len());
        if found.len() >= need {
            self.pass(detail).with_evidence(found)
        } else {
            self.fail(detail)
        }
    }
}

/// Phrase match on word boundaries of normalized text.
pub(crate) fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    format!(" {normalized} ").contains(&format!(" {phrase} "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use cbtsynth_core::facts::KnownFacts;

    fn run_with(rule: &dyn Constraint, value: &serde_json::Value, plan: &StagePlan) -> ConstraintResult {
        let profile = fixtures::profile("case_00001");
        let style = StyleRules::default();
        let known = KnownFacts::default();
        let ctx = CheckContext {
            profile: &profile,
            history: &[],
            plan,
            style: &style,
            known: &known,
        };
        rule.check(&Candidate::parse(&value.to_string()).unwrap(), &ctx)
    }

    #[test]
    fn fixture_meets_quotas() {
        let plan = fixtures::psychoeducation_plan();
        let v = fixtures::session_value(&plan);
        for rule in rules() {
            let result = run_with(rule.as_ref(), &v, &plan);
            assert!(result.passed, "{} failed: {}", result.rule_id, result.detail);
        }
    }

    #[test]
    fn missing_venting_blocks() {
        let plan = fixtures::s1_plan();
        let mut v = fixtures::session_value(&plan);
        v["dialogue"][3]["content"] = "It was a bad night.".into();
        let result = run_with(&Venting, &v, &plan);
        assert!(result.is_blocking());
        assert!(result.detail.starts_with("0 venting turn(s)"));
    }

    #[test]
    fn psychoeducation_only_when_concept_introduced() {
        let mut v = fixtures::session_value(&fixtures::s1_plan());
        v["dialogue"][6]["content"] = "Let's look at that.".into();
        v["dialogue"][20]["content"] = "See you next week.".into();
        assert!(run_with(&Psychoeducation, &v, &fixtures::s1_plan()).passed);

        let result = run_with(&Psychoeducation, &v, &fixtures::psychoeducation_plan());
        assert!(result.is_warning());
    }

    #[test]
    fn monologue_is_a_warning() {
        let plan = fixtures::s1_plan();
        let mut v = fixtures::session_value(&plan);
        v["dialogue"][4]["content"] = "word ".repeat(250).into();
        let result = run_with(&TurnLength, &v, &plan);
        assert!(result.is_warning());
        assert!(result.evidence[0].starts_with("250 words"));
    }

    #[test]
    fn resistance_markers_match_on_word_boundaries() {
        assert!(contains_phrase("yes but it feels true", "yes but"));
        assert!(!contains_phrase("eyes butter", "yes but"));

        let plan = fixtures::s1_plan();
        let mut v = fixtures::session_value(&plan);
        v["dialogue"][7]["content"] = "Okay, that makes sense.".into();
        assert!(run_with(&Resistance, &v, &plan).is_warning());
        v["dialogue"][7]["content"] = "I know, but what if I\u{2019}m wrong?".into();
        assert!(run_with(&Resistance, &v, &plan).passed);
    }
}
