//! Artifact/dialogue overlap. The artifact is split into units and each unit
//! must be said in the dialogue, verbatim or as a close paraphrase.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use cbtsynth_core::constraint::{ConstraintResult, Severity, ViolationKind};
use cbtsynth_core::session::Role;
use cbtsynth_core::stage::StagePlan;
use cbtsynth_core::text::{content_tokens, normalize};
use cbtsynth_settings::StyleRules;

use super::{excerpt, CheckContext, Constraint};
use crate::candidate::Candidate;

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:(?:[-*•]+|\d+[.)]|[a-z][.)])\s+)?(?:\[[ xX]?\]\s+)?").expect("valid regex"));

static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9 /&()'+–-]{0,40}:\s*").expect("valid regex"));

static TABLE_RULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\s|:+-]*$").expect("valid regex"));

static CLAUSE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.;!?]+\s*").expect("valid regex"));

pub fn rules() -> Vec<Arc<dyn Constraint>> {
    vec![Arc::new(ArtifactOverlap), Arc::new(ClosingSummary)]
}

/// One checkable piece of the artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactUnit {
    pub text: String,
    pub normalized: String,
    pub tokens: Vec<String>,
}

/// Split an artifact into units. Lines lose list markers, table pipes and
/// `Label:` prefixes; a single-line artifact is split into clauses instead.
/// Units with fewer than `min_tokens` content words are dropped.
pub fn artifact_units(artifact: &str, min_tokens: usize) -> Vec<ArtifactUnit> {
    let lines: Vec<&str> = artifact
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !TABLE_RULE.is_match(l))
        .collect();

    let pieces: Vec<String> = if lines.len() == 1 {
        CLAUSE_END
            .split(lines[0])
            .map(strip_decoration)
            .collect()
    } else {
        lines
            .iter()
            .flat_map(|line| line.split('|'))
            .map(strip_decoration)
            .collect()
    };

    pieces
        .into_iter()
        .filter_map(|text| {
            let tokens = content_tokens(&text);
            (tokens.len() >= min_tokens.max(1)).then(|| ArtifactUnit {
                normalized: normalize(&text),
                text,
                tokens,
            })
        })
        .collect()
}

fn strip_decoration(piece: &str) -> String {
    let piece = LIST_MARKER.replace(piece.trim(), "");
    let piece = LABEL.replace(piece.trim(), "");
    piece.trim().to_string()
}

/// How a unit was found in the dialogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitMatch {
    Verbatim,
    Paraphrase,
    Missing,
}

/// Turn texts prepared once for repeated unit lookups.
struct PreparedDialogue {
    normalized: Vec<String>,
    tokens: Vec<HashSet<String>>,
}

impl PreparedDialogue {
    fn new<'a>(turns: impl Iterator<Item = &'a str>) -> Self {
        let mut normalized = Vec::new();
        let mut tokens = Vec::new();
        for content in turns {
            normalized.push(normalize(content));
            tokens.push(content_tokens(content).into_iter().collect());
        }
        Self { normalized, tokens }
    }

    fn find(&self, unit: &ArtifactUnit, window: usize, threshold: f64) -> UnitMatch {
        if self.normalized.iter().any(|t| t.contains(&unit.normalized)) {
            return UnitMatch::Verbatim;
        }
        if self.tokens.is_empty() || unit.tokens.is_empty() {
            return UnitMatch::Missing;
        }
        let unique: HashSet<&String> = unit.tokens.iter().collect();
        let window = window.max(1).min(self.tokens.len());
        for start in 0..=(self.tokens.len() - window) {
            let covered = unique
                .iter()
                .filter(|tok| self.tokens[start..start + window].iter().any(|set| set.contains(**tok)))
                .count();
            if covered as f64 / unique.len() as f64 >= threshold {
                return UnitMatch::Paraphrase;
            }
        }
        UnitMatch::Missing
    }
}

/// Result of matching every unit against the dialogue.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlapReport {
    pub units: Vec<(ArtifactUnit, UnitMatch)>,
}

impl OverlapReport {
    pub fn matched(&self) -> usize {
        self.units.iter().filter(|(_, m)| *m != UnitMatch::Missing).count()
    }

    pub fn ratio(&self) -> f64 {
        if self.units.is_empty() {
            0.0
        } else {
            self.matched() as f64 / self.units.len() as f64
        }
    }

    pub fn missing(&self) -> impl Iterator<Item = &ArtifactUnit> {
        self.units.iter().filter(|(_, m)| *m == UnitMatch::Missing).map(|(u, _)| u)
    }
}

pub fn measure_overlap<'a>(
    artifact: &str,
    turns: impl Iterator<Item = &'a str>,
    style: &StyleRules,
    window: usize,
) -> OverlapReport {
    let dialogue = PreparedDialogue::new(turns);
    let units = artifact_units(artifact, style.min_unit_tokens)
        .into_iter()
        .map(|u| {
            let m = dialogue.find(&u, window, style.unit_match_threshold);
            (u, m)
        })
        .collect();
    OverlapReport { units }
}

pub struct ArtifactOverlap;

impl Constraint for ArtifactOverlap {
    fn id(&self) -> &'static str {
        "overlap.artifact"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Overlap
    }
    fn severity(&self) -> Severity {
        Severity::Hard
    }
    fn instruction(&self, style: &StyleRules, _plan: &StagePlan) -> String {
        format!(
            "Build the artifact inside the conversation: at least {:.0}% of its lines must be spoken in the dialogue, word for word or nearly so.",
            style.overlap_threshold * 100.0
        )
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let report = measure_overlap(
            candidate.artifact_text(),
            candidate.turns.iter().map(|t| t.content.as_str()),
            ctx.style,
            ctx.style.overlap_window,
        );
        if report.units.is_empty() {
            return self.fail("artifact has no checkable content".into());
        }
        let detail = format!(
            "{}/{} artifact units found in dialogue ({:.0}%, need {:.0}%)",
            report.matched(),
            report.units.len(),
            report.ratio() * 100.0,
            ctx.style.overlap_threshold * 100.0
        );
        if report.ratio() + f64::EPSILON >= ctx.style.overlap_threshold {
            self.pass(detail)
        } else {
            let missing = report.missing().map(|u| excerpt(&u.text)).collect();
            self.fail(detail).with_evidence(missing)
        }
    }
    fn repair_hint(&self, result: &ConstraintResult, _style: &StyleRules, _plan: &StagePlan) -> String {
        let mut hint = format!(
            "The artifact is not grounded in the dialogue ({}). Have the Counselor and Client work out each artifact line in the conversation.",
            result.detail
        );
        if !result.evidence.is_empty() {
            hint.push_str(" Lines never discussed: ");
            hint.push_str(&result.evidence.join(" | "));
        }
        hint
    }
}

/// The closing counselor turn restates the artifact.
pub struct ClosingSummary;

impl Constraint for ClosingSummary {
    fn id(&self) -> &'static str {
        "overlap.closing_summary"
    }
    fn kind(&self) -> ViolationKind {
        ViolationKind::Overlap
    }
    fn severity(&self) -> Severity {
        Severity::Soft
    }
    fn instruction(&self, _style: &StyleRules, _plan: &StagePlan) -> String {
        "The Counselor's final turn summarizes the session and states the artifact content.".into()
    }
    fn check(&self, candidate: &Candidate, ctx: &CheckContext<'_>) -> ConstraintResult {
        let Some(closing) = candidate.turns_by(Role::Counselor).last() else {
            return self.fail("no counselor turn".into());
        };
        if candidate.turns.last().map(|t| t.content.as_str()) != Some(closing.content.as_str()) {
            return self.fail("the session does not end with a counselor summary".into());
        }
        let report = measure_overlap(
            candidate.artifact_text(),
            std::iter::once(closing.content.as_str()),
            ctx.style,
            1,
        );
        let detail = format!("closing turn restates {}/{} artifact units", report.matched(), report.units.len());
        if !report.units.is_empty() && report.ratio() + f64::EPSILON >= ctx.style.overlap_threshold {
            self.pass(detail)
        } else {
            self.fail(detail).with_evidence(vec![excerpt(&closing.content)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use cbtsynth_core::facts::KnownFacts;

    fn run(rule: &dyn Constraint, value: &serde_json::Value) -> ConstraintResult {
        let profile = fixtures::profile("case_00001");
        let plan = fixtures::s1_plan();
        let style = StyleRules::default();
        let known = KnownFacts::default();
        let ctx = CheckContext {
            profile: &profile,
            history: &[],
            plan: &plan,
            style: &style,
            known: &known,
        };
        rule.check(&Candidate::parse(&value.to_string()).unwrap(), &ctx)
    }

    #[test]
    fn units_strip_labels_and_markers() {
        let units = artifact_units(fixtures::ARTIFACT, 2);
        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "charting errors at the end of a night shift",
                "I am going to hurt a patient and lose my license",
                "anxiety 8/10",
                "recheck every chart three times",
            ]
        );

        let units = artifact_units(
            "- [ ] Walk daily\n2) Call my sister on Sundays\n|---|---|\n| Missed one deadline | Boss praised my report |",
            2,
        );
        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Walk daily", "Call my sister on Sundays", "Missed one deadline", "Boss praised my report"]
        );
    }

    #[test]
    fn single_line_splits_into_clauses() {
        let units = artifact_units("Walk every evening; call Sam when anxious. Ok.", 2);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].text, "call Sam when anxious");
    }

    #[test]
    fn verbatim_and_paraphrase_matching() {
        let style = StyleRules::default();
        let turns = [
            "We agreed you'd walk every evening after dinner.",
            "Yes, and when I feel anxious",
            "I could phone Sam and talk it through.",
        ];
        let report = measure_overlap(
            "Walk every evening\nCall Sam when anxious\nJournal before bed nightly",
            turns.iter().copied(),
            &style,
            3,
        );
        assert_eq!(report.units[0].1, UnitMatch::Verbatim);
        // "call" never appears, but "sam" and "anxious" do: 2 of 3 tokens.
        assert_eq!(report.units[1].1, UnitMatch::Paraphrase);
        assert_eq!(report.units[2].1, UnitMatch::Missing);
        assert!((report.ratio() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn fixture_overlaps_fully() {
        let v = fixtures::session_value(&fixtures::s1_plan());
        let result = run(&ArtifactOverlap, &v);
        assert!(result.passed, "{}", result.detail);
        assert!(result.detail.starts_with("4/4"));
        assert!(run(&ClosingSummary, &v).passed);
    }

    #[test]
    fn ungrounded_artifact_fails() {
        let mut v = fixtures::session_value(&fixtures::s1_plan());
        v["artifact"]["content"] =
            "Trigger: dinner party invitations\nThought: everyone secretly dislikes me\nResponse: cancel plans early\nFeeling: shame 6/10".into();
        let result = run(&ArtifactOverlap, &v);
        assert!(result.is_blocking());
        assert!(!result.evidence.is_empty());

        v["artifact"]["content"] = "Ok.".into();
        assert!(run(&ArtifactOverlap, &v).detail.contains("no checkable content"));
    }

    #[test]
    fn closing_without_summary_warns() {
        let mut v = fixtures::session_value(&fixtures::s1_plan());
        v["dialogue"][20]["content"] = "See you next week.".into();
        let result = run(&ClosingSummary, &v);
        assert!(result.is_warning());
        assert!(run(&ArtifactOverlap, &v).passed);
    }
}
