//! Shape of the output object and of the dialogue.

use std::sync::Arc;

use cbtsynth_core::constraint::{ConstraintResult, Severity, ViolationKind};
use cbtsynth_core::session::{Role, SessionNumber};
use cbtsynth_core::stage::{labels_match, StagePlan};
use cbtsynth_settings::StyleRules;

use super::{excerpt, CheckContext, Constraint};
use crate::candidate::Candidate;

pub fn rules() -> Vec<Arc<dyn Constraint>> {
    vec![
        Arc::new(BareJson),
        Arc::new(RequiredKeys),
        Arc::new(SessionIdMatches),
        Arc::new(StageMatches),
        Arc::new(ArtifactTypeMatches),
        Arc::new(TurnCount),
        Arc::new(ValidRoles),
        Arc::new(Alternation),
        Arc::new(NonEmptyTurns),
    ]
}

pub struct BareJson;

impl Constraint for BareJson {
    fn id(&self) -> &'static str {
        "structure.bare_json"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "Output one bare JSON object: no markdown fences, no text before or after it.".into()
    }
    fn check(&self, candidate: &Candidate, _ctx: &CheckContext<'_>) -> ConstraintResult {
        match (candidate.fenced, candidate.extra_text) {
            (false, false) => self.pass("bare JSON object".into()),
            (true, _) => self.fail("output was wrapped in markdown fences".into()),
            (false, true) => self.fail("output contained text outside the JSON object".into()),
        }
    }
}

pub struct RequiredKeys;

impl Constraint for RequiredKeys {
    fn id(&self) -> &'static str {
        "structure.required_keys"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "Include every key of the output format: session_id, stage, stage_objective, artifact {type, content}, dialogue [].".into()
    }
    fn check(&self, candidate: &Candidate, _ctx: &CheckContext<'_>) -> ConstraintResult {
        let missing = candidate.missing_keys();
        if missing.is_empty() {
            self.pass("all keys present".into())
        } else {
            self.fail(format!("missing or malformed: {}", missing.join(", ")))
        }
    }
}

pub struct SessionIdMatches;

impl Constraint for SessionIdMatches {
    fn id(&self) -> &'static str {
        "structure.session_id"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, plan: &StagePlan) -> String {
        format!("session_id must be exactly \"{}\".", plan.session_id)
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let raw = candidate.session_id.as_deref().unwrap_or("");
        match raw.parse::<SessionNumber>() {
            Ok(n) if n == ctx.plan.session_id && raw.trim() == raw => self.pass(format!("{n}")),
            _ => self.fail(format!("expected {}, got {raw:?}", ctx.plan.session_id)),
        }
    }
}

pub struct StageMatches;

impl Constraint for StageMatches {
    fn id(&self) -> &'static str {
        "structure.stage"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, plan: &StagePlan) -> String {
        format!("stage must be \"{}\".", plan.stage)
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let stage = candidate.stage.as_deref().unwrap_or("");
        if labels_match(stage, &ctx.plan.stage) {
            self.pass(stage.to_string())
        } else {
            self.fail(format!("expected {:?}, got {stage:?}", ctx.plan.stage))
        }
    }
}

pub struct ArtifactTypeMatches;

impl Constraint for ArtifactTypeMatches {
    fn id(&self) -> &'static str {
        "structure.artifact_type"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, plan: &StagePlan) -> String {
        format!("artifact.type must be \"{}\" and artifact.content must be non-empty.", plan.artifact_type)
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let kind = candidate.artifact_type.as_deref().unwrap_or("");
        if !labels_match(kind, &ctx.plan.artifact_type) {
            return self.fail(format!("expected {:?}, got {kind:?}", ctx.plan.artifact_type));
        }
        if candidate.artifact_text().trim().is_empty() {
            return self.fail("artifact content is empty".into());
        }
        self.pass(kind.to_string())
    }
}

pub struct TurnCount;

impl Constraint for TurnCount {
    fn id(&self) -> &'static str {
        "structure.turn_count"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, style: &StyleRules, _plan: &StagePlan) -> String {
        format!(
            "The dialogue has between {} and {} entries (an odd count, since the Counselor opens and closes).",
            style.min_turns, style.max_turns
        )
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let n = candidate.turns.len();
        let (min, max) = (ctx.style.min_turns, ctx.style.max_turns);
        if (min..=max).contains(&n) {
            self.pass(format!("{n} entries"))
        } else {
            self.fail(format!("{n} entries, allowed [{min}, {max}]"))
        }
    }
}

pub struct ValidRoles;

impl Constraint for ValidRoles {
    fn id(&self) -> &'static str {
        "structure.roles"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "Every role is exactly \"Counselor\" or \"Client\".".into()
    }
    fn check(&self, candidate: &Candidate, _ctx: &CheckContext<'_>) -> ConstraintResult {
        let bad: Vec<String> = candidate
            .turns
            .iter()
            .enumerate()
            .filter(|(_, t)| t.role().is_none())
            .map(|(i, t)| format!("#{}: {:?}", i + 1, t.role))
            .collect();
        if bad.is_empty() {
            self.pass("roles valid".into())
        } else {
            self.fail(format!("{} turn(s) with invalid roles", bad.len())).with_evidence(bad)
        }
    }
}

pub struct Alternation;

impl Constraint for Alternation {
    fn id(&self) -> &'static str {
        "structure.alternation"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "Roles strictly alternate; the first and the last entry are both Counselor.".into()
    }
    fn check(&self, candidate: &Candidate, _ctx: &CheckContext<'_>) -> ConstraintResult {
        let roles: Vec<Option<Role>> = candidate.turns.iter().map(|t| t.role()).collect();
        let mut problems = Vec::new();
        match roles.first() {
            None => return self.fail("dialogue is empty".into()),
            Some(Some(Role::Counselor)) => {}
            Some(_) => problems.push("first entry is not Counselor".to_string()),
        }
        if !matches!(roles.last(), Some(Some(Role::Counselor))) {
            problems.push("last entry is not Counselor".to_string());
        }
        let mut evidence = Vec::new();
        for (i, pair) in roles.windows(2).enumerate() {
            if pair[0].is_some() && pair[0] == pair[1] {
                evidence.push(format!("#{} and #{}: {}", i + 1, i + 2, excerpt(&candidate.turns[i + 1].content)));
            }
        }
        if !evidence.is_empty() {
            problems.push(format!("{} repeated speaker(s)", evidence.len()));
        }
        if problems.is_empty() {
            self.pass("strict alternation".into())
        } else {
            self.fail(problems.join("; ")).with_evidence(evidence)
        }
    }
}

pub struct NonEmptyTurns;

impl Constraint for NonEmptyTurns {
    fn id(&self) -> &'static str {
        "structure.empty_turns"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Structural
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "Every dialogue entry has non-empty content.".into()
    }
    fn check(&self, candidate: &Candidate, _ctx: &CheckContext<'_>) -> ConstraintResult {
        let empty: Vec<String> = candidate
            .turns
            .iter()
            .enumerate()
            .filter(|(_, t)| t.content.trim().is_empty())
            .map(|(i, _)| format!("#{}", i + 1))
            .collect();
        if empty.is_empty() {
            self.pass("no empty turns".into())
        } else {
            self.fail(format!("{} empty turn(s)", empty.len())).with_evidence(empty)
        }
    }
}
