//! Stage planning. Maps a case's committed history onto the six-stage arc
//! and decides what the next session must be.

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::session::{SessionNumber, SessionRecord};
use cbtsynth_core::stage::{labels_match, StagePlan, StageTargets};
use cbtsynth_core::text::normalize;
use cbtsynth_settings::PlannerSettings;

use crate::error::PlanningError;

/// One stage of the arc.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageSpec {
    pub stage: &'static str,
    pub objective: &'static str,
    pub artifact_type: &'static str,
    pub requirements: &'static str,
    pub targets: StageTargets,
}

const fn targets(introduces_concept: bool) -> StageTargets {
    StageTargets {
        min_venting_turns: 1,
        min_educational_turns: 1,
        introduces_concept,
    }
}

pub const DEFAULT_ARC: [StageSpec; 6] = [
    StageSpec {
        stage: "Build Trust & Assessment",
        objective: "Build rapport, clarify goals, assess the problem, and agree on a simple tracking task.",
        artifact_type: "Trigger/Thought Log",
        requirements: "Provide a simple log template and include exactly 2 example entries based on this case.",
        targets: targets(false),
    },
    StageSpec {
        stage: "Identifying Negative Cognitions",
        objective: "Review the log and map situation, thought, emotion, body and behavior to identify automatic thoughts.",
        artifact_type: "CBT Map",
        requirements: "Provide one worked CBT map example: situation, automatic thought, emotions (0-10), body sensations, behaviors.",
        targets: targets(true),
    },
    StageSpec {
        stage: "Challenging False Beliefs",
        objective: "Reality-test distorted thoughts and generate a more balanced alternative thought.",
        artifact_type: "Reality Test Table",
        requirements: "Provide a table-like text with: Thought, Evidence For, Evidence Against, Balanced Thought.",
        targets: targets(true),
    },
    StageSpec {
        stage: "Restructuring Cognitive Patterns",
        objective: "Create adaptive replacement scripts and an If–Then plan for predictable triggers.",
        artifact_type: "Replacement Script + If–Then Plan",
        requirements: "Provide a compassionate replacement script (3–5 sentences) and 2 If–Then plans tailored to this case.",
        targets: targets(false),
    },
    StageSpec {
        stage: "Behavioral Skill Building",
        objective: "Practice coping skills and design a concrete plan for high-risk moments.",
        artifact_type: "Skills Plan + Crisis Plan",
        requirements: "List 3 coping skills with when/how to use them, and a 3-step crisis plan.",
        targets: targets(false),
    },
    StageSpec {
        stage: "Consolidation & Termination",
        objective: "Review gains and formalize a long-term maintenance plan and setback prevention.",
        artifact_type: "Maintenance + Setback Prevention Plan",
        requirements: "Provide a maintenance plan (weekly goals for next 2–4 weeks) and a setback prevention checklist.",
        targets: targets(false),
    },
];

/// Where a history sits on the arc.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ArcPosition {
    /// Index of the next catalog stage to run.
    next: usize,
    /// Last catalog stage completed and how often it was repeated since.
    last: Option<(usize, u32)>,
}

/// Deterministic `(profile, history) -> next plan`.
#[derive(Clone, Debug)]
pub struct StagePlanner {
    catalog: Vec<StageSpec>,
    max_stage_repeats: u32,
    incomplete_markers: Vec<String>,
}

impl Default for StagePlanner {
    fn default() -> Self {
        Self::from_settings(&PlannerSettings::default())
    }
}

impl StagePlanner {
    pub fn from_settings(settings: &PlannerSettings) -> Self {
        Self {
            catalog: DEFAULT_ARC.to_vec(),
            max_stage_repeats: settings.max_stage_repeats,
            incomplete_markers: settings
                .homework_incomplete_markers
                .iter()
                .map(|m| normalize(m))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn catalog(&self) -> &[StageSpec] {
        &self.catalog
    }

    pub fn find_stage(&self, stage: &str) -> Option<&StageSpec> {
        self.catalog.iter().find(|s| labels_match(s.stage, stage))
    }

    /// Next plan, or `None` once the arc is complete.
    pub fn plan_next(
        &self,
        profile: &CaseProfile,
        history: &[SessionRecord],
    ) -> Result<Option<StagePlan>, PlanningError> {
        let position = self.position(history)?;
        let session_id = SessionNumber::new(history.len() as u32);

        if let Some((idx, repeats)) = position.last {
            let spec = &self.catalog[idx];
            let latest = history.iter().rev().find(|r| labels_match(&r.stage, spec.stage));
            if repeats < self.max_stage_repeats && latest.is_some_and(|r| self.homework_incomplete(r)) {
                return Ok(Some(self.build_plan(profile, spec, session_id, true)));
            }
        }

        Ok(self
            .catalog
            .get(position.next)
            .map(|spec| self.build_plan(profile, spec, session_id, false)))
    }

    pub fn is_complete(&self, profile: &CaseProfile, history: &[SessionRecord]) -> Result<bool, PlanningError> {
        Ok(self.plan_next(profile, history)?.is_none())
    }

    fn position(&self, history: &[SessionRecord]) -> Result<ArcPosition, PlanningError> {
        let first = history.first().ok_or(PlanningError::EmptyHistory)?;
        if !first.session_id.is_intake() {
            return Err(PlanningError::MissingIntake(first.session_id));
        }
        for (i, record) in history.iter().enumerate() {
            let expected = SessionNumber::new(i as u32);
            if record.session_id != expected {
                return Err(PlanningError::NonContiguous {
                    expected,
                    found: record.session_id,
                });
            }
        }

        let mut pos = ArcPosition::default();
        for record in &history[1..] {
            // Off-catalog stages come from explicit plans and don't move the arc.
            let Some(idx) = self.catalog.iter().position(|s| labels_match(s.stage, &record.stage)) else {
                continue;
            };
            let spec = &self.catalog[idx];
            if !labels_match(spec.artifact_type, &record.artifact.kind) {
                return Err(PlanningError::ArtifactMismatch {
                    session: record.session_id,
                    stage: record.stage.clone(),
                    expected: spec.artifact_type.to_string(),
                    found: record.artifact.kind.clone(),
                });
            }
            match pos.last {
                Some((last, repeats)) if last == idx => pos.last = Some((last, repeats + 1)),
                _ if idx == pos.next => {
                    pos.last = Some((idx, 0));
                    pos.next += 1;
                }
                _ => {
                    return Err(PlanningError::OutOfOrder {
                        session: record.session_id,
                        stage: record.stage.clone(),
                        expected: self
                            .catalog
                            .get(pos.next)
                            .map_or("arc complete", |s| s.stage)
                            .to_string(),
                    });
                }
            }
        }
        Ok(pos)
    }

    fn homework_incomplete(&self, record: &SessionRecord) -> bool {
        let content = normalize(&record.artifact.content);
        self.incomplete_markers.iter().any(|m| content.contains(m.as_str()))
    }

    fn build_plan(&self, profile: &CaseProfile, spec: &StageSpec, session_id: SessionNumber, repeated: bool) -> StagePlan {
        let mut requirements = spec.requirements.to_string();
        if !profile.cbt_technique.trim().is_empty() {
            requirements.push_str(&format!(
                " Ground the work in the case's technique ({}).",
                profile.cbt_technique.trim()
            ));
        }
        let objective = if repeated {
            requirements.insert_str(
                0,
                "The previous homework was not completed: explore the obstacles first, then redo the artifact. ",
            );
            format!("Revisit: {}", spec.objective)
        } else {
            spec.objective.to_string()
        };

        let mut plan = StagePlan::new(session_id, spec.stage, objective, spec.artifact_type)
            .with_targets(spec.targets.clone())
            .with_requirements(requirements);
        plan.repeated = repeated;
        plan
    }
}
