//! Declarative rules. Each rule is an independent predicate over a decoded
//! candidate; its prompt wording lives next to it but is never used to judge.

pub mod continuity;
pub mod overlap;
pub mod statistical;
pub mod structural;

use std::sync::Arc;

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::constraint::{ConstraintResult, Severity, ValidationReport, ViolationKind};
use cbtsynth_core::facts::KnownFacts;
use cbtsynth_core::session::SessionRecord;
use cbtsynth_core::stage::StagePlan;
use cbtsynth_settings::StyleRules;

use crate::candidate::Candidate;

/// Everything a rule may consult besides the candidate.
pub struct CheckContext<'a> {
    pub profile: &'a CaseProfile,
    pub history: &'a [SessionRecord],
    pub plan: &'a StagePlan,
    pub style: &'a StyleRules,
    /// Facts established by the intake and committed sessions.
    pub known: &'a KnownFacts,
}

pub trait Constraint: Send + Sync {
    /// Stable rule id, e.g. `structure.turn_count`.
    fn id(&self) -> &'static str;
    fn kind(&self) -> ViolationKind;
    fn severity(&self) -> Severity;

    /// Instruction shown to the generator.
    fn instruction(&self, style: &StyleRules, plan: &StagePlan) -> String;

    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult;

    /// Corrective directive for a failed result.
    fn repair_hint(&self, result: &ConstraintResult, style: &StyleRules, plan: &StagePlan) -> String {
        format!("{} Problem: {}", self.instruction(style, plan), result.detail)
    }

    fn pass(&self, detail: String) -> ConstraintResult {
        ConstraintResult::pass(self.id(), self.kind(), self.severity(), detail)
    }

    fn fail(&self, detail: String) -> ConstraintResult {
        ConstraintResult::fail(self.id(), self.kind(), self.severity(), detail)
    }
}

/// Rules in registration order. Order is stable, so reports are too.
pub struct ConstraintRegistry {
    rules: Vec<Arc<dyn Constraint>>,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Every built-in rule.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for rule in structural::rules()
            .into_iter()
            .chain(statistical::rules())
            .chain(continuity::rules())
            .chain(overlap::rules())
        {
            registry.register(rule);
        }
        registry
    }

    /// Register a rule, replacing any rule with the same id in place.
    pub fn register(&mut self, rule: Arc<dyn Constraint>) {
        match self.rules.iter().position(|r| r.id() == rule.id()) {
            Some(idx) => self.rules[idx] = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id() != id);
        self.rules.len() != before
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Constraint>> {
        self.rules.iter().find(|r| r.id() == id).cloned()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    pub fn count(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Constraint>> {
        self.rules.iter()
    }

    /// Numbered `[HARD]`/`[SOFT]` instructions for the prompt.
    pub fn instructions(&self, style: &StyleRules, plan: &StagePlan) -> Vec<String> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. [{}] {}", i + 1, r.severity().tag(), r.instruction(style, plan)))
            .collect()
    }

    /// Run every rule; never stops at the first failure.
    pub fn evaluate(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ValidationReport {
        ValidationReport::new(self.rules.iter().map(|r| r.check(candidate, ctx)).collect())
    }
}

impl Default for ConstraintRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Bounded excerpt for evidence lists.
pub(crate) fn excerpt(text: &str) -> String {
    cbtsynth_core::text::clip(text.trim(), 120)
}
