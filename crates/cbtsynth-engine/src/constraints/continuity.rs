//! Persona and history consistency.

use std::sync::Arc;

use cbtsynth_core::constraint::{ConstraintResult, Severity, ViolationKind};
use cbtsynth_core::facts::{self, Contradiction, FactClaim};
use cbtsynth_core::session::Role;
use cbtsynth_core::stage::StagePlan;
use cbtsynth_core::text::normalize;
use cbtsynth_settings::StyleRules;

use super::statistical::contains_phrase;
use super::{excerpt, CheckContext, Constraint};
use crate::candidate::Candidate;

pub fn rules() -> Vec<Arc<dyn Constraint>> {
    vec![Arc::new(Persona), Arc::new(History), Arc::new(BackReference)]
}

/// Claims in the dialogue plus the artifact, read in the client's voice.
pub fn candidate_claims(candidate: &Candidate) -> Vec<FactClaim> {
    let mut claims = facts::extract_claims(&candidate.dialogue_turns());
    claims.extend(facts::extract_text_claims(candidate.artifact_text(), Role::Client));
    claims
}

fn describe(contradictions: &[Contradiction]) -> (String, Vec<String>) {
    let detail = contradictions
        .iter()
        .map(|c| format!("{} should be {:?}, found {:?}", c.kind, c.expected, c.found))
        .collect::<Vec<_>>()
        .join("; ");
    let evidence = contradictions.iter().map(|c| excerpt(&c.excerpt)).collect();
    (detail, evidence)
}

/// Name, age and occupation against the case profile.
pub struct Persona;

impl Constraint for Persona {
    fn id(&self) -> &'static str {
        "continuity.persona"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Continuity
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "Keep the Client's name, age and occupation exactly as in the case profile.".into()
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let found = facts::check_profile(ctx.profile.client(), &candidate_claims(candidate));
        if found.is_empty() {
            return self.pass("consistent with profile".into());
        }
        let (detail, evidence) = describe(&found);
        self.fail(detail).with_evidence(evidence)
    }
    fn repair_hint(&self, result: &ConstraintResult, _style: &StyleRules, _plan: &StagePlan) -> String {
        format!(
            "The transcript contradicts the case profile ({}). Remove or correct every such statement.",
            result.detail
        )
    }
}

/// Names of people and facts established in earlier sessions.
pub struct History;

impl Constraint for History {
    fn id(&self) -> &'static str {
        "continuity.history"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Continuity
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "Do not contradict the intake or prior sessions: people keep their names and the Client's facts stay fixed.".into()
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let found = ctx.known.check(&candidate_claims(candidate));
        if found.is_empty() {
            return self.pass("consistent with history".into());
        }
        let (detail, evidence) = describe(&found);
        self.fail(detail).with_evidence(evidence)
    }
    fn repair_hint(&self, result: &ConstraintResult, _style: &StyleRules, _plan: &StagePlan) -> String {
        format!(
            "The transcript contradicts earlier sessions ({}). Use the names and facts already established.",
            result.detail
        )
    }
}

/// Explicit link back to earlier work.
pub struct BackReference;

impl Constraint for BackReference {
    fn id(&self) -> &'static str {
        "continuity.back_reference"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Continuity
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, style: &StyleRules, _plan: &StagePlan) -> String {
        let examples: Vec<&str> = style.back_reference_phrases.iter().take(3).map(String::as_str).collect();
        format!(
            "The Counselor explicitly refers back to earlier sessions at least once (e.g. \"{}\").",
            examples.join("\", \"")
        )
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let phrases: Vec<String> = ctx
            .style
            .back_reference_phrases
            .iter()
            .map(|p| normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        let hit = candidate.turns_by(Role::Counselor).find(|t| {
            let text = normalize(&t.content.replace('\u{2019}', "'"));
            phrases.iter().any(|p| contains_phrase(&text, p))
        });
        match hit {
            Some(turn) => self.pass("back-reference present".into()).with_evidence(vec![excerpt(&turn.content)]),
            None => self.fail("no counselor turn refers back to earlier sessions".into()),
        }
    }
}
