use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a rule. Every category is repairable by regeneration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Parse,
    Structural,
    Statistical,
    Continuity,
    Overlap,
}

impl ViolationKind {
    /// Order in which corrective instructions are presented. Lower goes first.
    pub fn repair_priority(self) -> u8 {
        match self {
            Self::Continuity => 0,
            Self::Parse => 1,
            Self::Structural => 2,
            Self::Overlap => 3,
            Self::Statistical => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Structural => "structural",
            Self::Statistical => "statistical",
            Self::Continuity => "continuity",
            Self::Overlap => "overlap",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hard results block commit; soft results are warnings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

impl Severity {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Hard => "HARD",
            Self::Soft => "SOFT",
        }
    }
}

/// Outcome of one rule against one candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintResult {
    pub rule_id: String,
    pub kind: ViolationKind,
    pub severity: Severity,
    pub passed: bool,
    pub detail: String,
    /// Short excerpts from the candidate that triggered the result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

impl ConstraintResult {
    pub fn pass(rule_id: &str, kind: ViolationKind, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            kind,
            severity,
            passed: true,
            detail: detail.into(),
            evidence: Vec::new(),
        }
    }

    pub fn fail(rule_id: &str, kind: ViolationKind, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            kind,
            severity,
            passed: false,
            detail: detail.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn is_blocking(&self) -> bool {
        !self.passed && self.severity == Severity::Hard
    }

    pub fn is_warning(&self) -> bool {
        !self.passed && self.severity == Severity::Soft
    }
}

/// Every result for one candidate, in registry order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub results: Vec<ConstraintResult>,
}

impl ValidationReport {
    pub fn new(results: Vec<ConstraintResult>) -> Self {
        Self { results }
    }

    /// True when no hard rule failed.
    pub fn passed(&self) -> bool {
        !self.results.iter().any(ConstraintResult::is_blocking)
    }

    pub fn blocking(&self) -> impl Iterator<Item = &ConstraintResult> {
        self.results.iter().filter(|r| r.is_blocking())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConstraintResult> {
        self.results.iter().filter(|r| r.is_warning())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConstraintResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    pub fn has_kind(&self, kind: ViolationKind) -> bool {
        self.blocking().any(|r| r.kind == kind)
    }

    pub fn get(&self, rule_id: &str) -> Option<&ConstraintResult> {
        self.results.iter().find(|r| r.rule_id == rule_id)
    }

    pub fn failed_rule_ids(&self) -> Vec<String> {
        self.failures().map(|r| r.rule_id.clone()).collect()
    }
}
