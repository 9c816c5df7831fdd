//! Prompt composition. Turns a case, its history and a stage plan into a
//! labelled `PromptRequest`; repair requests add the rejected output and the
//! fixes it needs. Pure: no I/O after construction.

use std::path::Path;
use std::sync::Arc;

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::constraint::ConstraintResult;
use cbtsynth_core::prompt::{BlockLabel, PromptRequest};
use cbtsynth_core::session::SessionRecord;
use cbtsynth_core::stage::StagePlan;
use cbtsynth_core::text::clip;
use cbtsynth_settings::{PromptSettings, StyleRules};

use crate::attempt::GenerationAttempt;
use crate::constraints::ConstraintRegistry;
use crate::truncate::truncate_output;
use crate::validator::PARSE_RULE;

/// Built-in counselor writing rules.
pub const CORE_PROMPT: &str = include_str!("../prompts/system.md");

pub struct PromptComposer {
    system_prompt: String,
    style: Arc<StyleRules>,
    registry: Arc<ConstraintRegistry>,
    settings: PromptSettings,
}

impl PromptComposer {
    pub fn new(style: Arc<StyleRules>, registry: Arc<ConstraintRegistry>, settings: PromptSettings) -> Self {
        Self {
            system_prompt: CORE_PROMPT.to_string(),
            style,
            registry,
            settings,
        }
    }

    /// Like [`new`](Self::new), but reads `system_prompt_path` when configured.
    pub fn from_settings(
        style: Arc<StyleRules>,
        registry: Arc<ConstraintRegistry>,
        settings: PromptSettings,
    ) -> std::io::Result<Self> {
        let override_path = settings.system_prompt_path.clone();
        let composer = Self::new(style, registry, settings);
        match override_path {
            Some(path) => {
                let text = std::fs::read_to_string(Path::new(&path))?;
                Ok(composer.with_system_prompt(text))
            }
            None => Ok(composer),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Same prompt and settings, different rule set.
    pub fn with_registry(self, registry: Arc<ConstraintRegistry>) -> Self {
        Self { registry, ..self }
    }

    pub fn style(&self) -> &Arc<StyleRules> {
        &self.style
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn compose(&self, profile: &CaseProfile, history: &[SessionRecord], plan: &StagePlan) -> PromptRequest {
        let mut request = PromptRequest::empty();
        request.push_system(BlockLabel::CorePrompt, self.system_prompt.clone());
        request.push_system(BlockLabel::StyleRules, render_style(&self.style));

        request.push_section(BlockLabel::TargetStage, self.render_plan(plan));
        request.push_section(BlockLabel::CaseProfile, render_profile(profile));
        if let Some(intake) = history.first().filter(|r| r.is_intake()) {
            request.push_section(
                BlockLabel::IntakeTranscript,
                truncate_output(&render_dialogue(intake), self.settings.intake_max_chars),
            );
        }
        request.push_section(BlockLabel::PriorSessions, self.render_prior(history));
        request.push_section(
            BlockLabel::Constraints,
            self.registry.instructions(&self.style, plan).join("\n"),
        );
        request.push_section(BlockLabel::OutputContract, render_contract(plan));
        request
    }

    /// The normal request plus the rejected output and corrective directives.
    pub fn compose_repair(
        &self,
        profile: &CaseProfile,
        history: &[SessionRecord],
        plan: &StagePlan,
        rejected: &GenerationAttempt,
    ) -> PromptRequest {
        let mut request = self.compose(profile, history, plan);
        if let Some(text) = &rejected.raw_text {
            request.push_section(
                BlockLabel::PreviousAttempt,
                truncate_output(text, self.settings.previous_output_max_chars),
            );
        }

        let violations = match rejected.report {
            Some(_) => rejected.violations(),
            None => rejected.prior_violations.iter().collect(),
        };
        let directives = self.repair_directives(&violations, plan);
        if !directives.is_empty() {
            let mut body = String::from(
                "Your previous output was rejected. Rewrite the whole session and fix, in this order:\n",
            );
            body.push_str(&directives.join("\n"));
            request.push_section(BlockLabel::RepairDirectives, body);
        }
        request
    }

    /// Numbered fixes: hard violations by kind priority, soft warnings last.
    pub fn repair_directives(&self, violations: &[&ConstraintResult], plan: &StagePlan) -> Vec<String> {
        let mut ordered: Vec<&ConstraintResult> = violations.iter().copied().filter(|v| !v.passed).collect();
        ordered.sort_by_key(|v| (v.is_warning(), v.kind.repair_priority()));

        ordered
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let hint = match self.registry.get(&v.rule_id) {
                    Some(rule) => rule.repair_hint(v, &self.style, plan),
                    None if v.rule_id == PARSE_RULE => format!(
                        "Return exactly one JSON object matching OUTPUT FORMAT, with no text around it. Parser error: {}",
                        v.detail
                    ),
                    None => format!("Fix this problem: {}", v.detail),
                };
                let mut line = format!("{}. [{}] {}", i + 1, v.rule_id, hint);
                for evidence in &v.evidence {
                    line.push_str(&format!("\n   offending text: \"{evidence}\""));
                }
                line
            })
            .collect()
    }

    fn render_plan(&self, plan: &StagePlan) -> String {
        let mut out = format!(
            "session_id: {}\nstage: {}\nstage_objective: {}\nartifact.type: {}\n",
            plan.session_id, plan.stage, plan.stage_objective, plan.artifact_type
        );
        if !plan.artifact_requirements.is_empty() {
            out.push_str(&format!("artifact requirements: {}\n", plan.artifact_requirements));
        }
        out.push_str(&format!(
            "client venting turns ({}-{} words): at least {}\n",
            self.style.venting_min_words, self.style.venting_max_words, plan.targets.min_venting_turns
        ));
        if plan.targets.introduces_concept {
            out.push_str(&format!(
                "counselor educational turns ({}-{} words): at least {}\n",
                self.style.education_min_words, self.style.education_max_words, plan.targets.min_educational_turns
            ));
        }
        if plan.repeated {
            out.push_str("This stage is being repeated because the client did not complete the last assignment.\n");
        }
        out
    }

    fn render_prior(&self, history: &[SessionRecord]) -> String {
        let sessions: Vec<&SessionRecord> = history.iter().filter(|r| !r.is_intake()).collect();
        let verbatim_from = sessions.len().saturating_sub(self.settings.verbatim_sessions);

        sessions
            .iter()
            .enumerate()
            .map(|(i, record)| {
                if i >= verbatim_from {
                    serde_json::to_string_pretty(record).unwrap_or_default()
                } else {
                    summarize(record, self.settings.summary_max_chars)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn render_style(style: &StyleRules) -> String {
    let mut lines = vec![
        format!("- Each session has {} to {} dialogue entries.", style.min_turns, style.max_turns),
        "- Counselor and Client strictly alternate. The Counselor speaks first and last.".to_string(),
        format!(
            "- Client venting turns run {} to {} words.",
            style.venting_min_words, style.venting_max_words
        ),
        format!(
            "- Counselor teaching turns run {} to {} words.",
            style.education_min_words, style.education_max_words
        ),
        format!("- No counselor turn exceeds {} words.", style.counselor_max_words),
        format!(
            "- At least {:.0}% of the artifact's lines are spoken in the dialogue.",
            style.overlap_threshold * 100.0
        ),
        "- The closing counselor turn restates the artifact.".to_string(),
    ];
    if !style.back_reference_phrases.is_empty() {
        lines.push(format!(
            "- The counselor refers back to earlier sessions (e.g. \"{}\").",
            style.back_reference_phrases[0]
        ));
    }
    lines.join("\n")
}

/// Profile minus the intake dialogue, which gets its own section.
fn render_profile(profile: &CaseProfile) -> String {
    let mut value = serde_json::to_value(profile).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("dialogue");
    }
    serde_json::to_string_pretty(&value).unwrap_or_default()
}

fn render_dialogue(record: &SessionRecord) -> String {
    record
        .dialogue
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize(record: &SessionRecord, max_chars: usize) -> String {
    let summary = format!(
        "{} | {} | objective: {} | {}: {}",
        record.session_id,
        record.stage,
        record.stage_objective,
        record.artifact.kind,
        record.artifact.content.replace('\n', " / ")
    );
    clip(&summary, max_chars)
}

fn render_contract(plan: &StagePlan) -> String {
    format!(
        "Return one JSON object with exactly these keys and no markdown fences:\n\
         {{\"session_id\":\"{}\",\"stage\":\"{}\",\"stage_objective\":\"<string>\",\n \
         \"artifact\":{{\"type\":\"{}\",\"content\":\"<string>\"}},\n \
         \"dialogue\":[{{\"role\":\"Counselor\"|\"Client\",\"content\":\"<string>\"}}, ...]}}",
        plan.session_id, plan.stage, plan.artifact_type
    )
}
