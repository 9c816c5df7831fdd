//! Cognitive Conceptualization Diagram extraction from client utterances.
//! Output is parsed strictly: exactly six keys, or the attempt is repaired.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::ids::CaseId;
use cbtsynth_core::prompt::{BlockLabel, PromptRequest};
use cbtsynth_core::provider::{GenerateOptions, LlmProvider};
use cbtsynth_core::session::{DialogueTurn, Role, SessionNumber};
use cbtsynth_settings::CcdSettings;

use crate::transcript::TranscriptBundle;

pub const CCD_PROMPT: &str = include_str!("../prompts/ccd.md");

pub const CCD_KEYS: [&str; 6] = [
    "Situation",
    "Automatic_Thoughts",
    "Emotions",
    "Behaviors",
    "Intermediate_Beliefs",
    "Core_Beliefs",
];

const NO_EVIDENCE: &str = "- (no client utterances found)";

#[derive(Debug, thiserror::Error)]
pub enum CcdError {
    #[error("invalid CCD: {0}")]
    Invalid(String),

    #[error("generation error: {0}")]
    Generation(GenerationError),

    #[error("no valid CCD after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("extraction cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ccd {
    #[serde(rename = "Situation", deserialize_with = "text_or_list")]
    pub situation: String,
    #[serde(rename = "Automatic_Thoughts", deserialize_with = "list_or_text")]
    pub automatic_thoughts: Vec<String>,
    #[serde(rename = "Emotions", deserialize_with = "list_or_text")]
    pub emotions: Vec<String>,
    #[serde(rename = "Behaviors", deserialize_with = "list_or_text")]
    pub behaviors: Vec<String>,
    #[serde(rename = "Intermediate_Beliefs", deserialize_with = "list_or_text")]
    pub intermediate_beliefs: Vec<String>,
    #[serde(rename = "Core_Beliefs", deserialize_with = "list_or_text")]
    pub core_beliefs: Vec<String>,
}

impl Ccd {
    /// Bare JSON object with exactly the six CCD keys.
    pub fn parse_strict(raw: &str) -> Result<Self, CcdError> {
        let value: serde_json::Value =
            serde_json::from_str(raw.trim()).map_err(|e| CcdError::Invalid(format!("not JSON: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| CcdError::Invalid("not a JSON object".into()))?;

        let found: BTreeSet<&str> = obj.keys().map(String::as_str).collect();
        let expected: BTreeSet<&str> = CCD_KEYS.into_iter().collect();
        if found != expected {
            let extra: Vec<_> = found.difference(&expected).collect();
            let missing: Vec<_> = expected.difference(&found).collect();
            return Err(CcdError::Invalid(format!("keys mismatch; missing {missing:?}, extra {extra:?}")));
        }
        serde_json::from_value(value).map_err(|e| CcdError::Invalid(e.to_string()))
    }
}

fn text_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items.iter().filter_map(value_text).collect::<Vec<_>>().join("; "),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn list_or_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Array(items) => items.iter().filter_map(value_text).collect(),
        serde_json::Value::Null => Vec::new(),
        other => value_text(&other).into_iter().collect(),
    })
}

fn value_text(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcdStatus {
    Ok,
    Fail,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionCcd {
    pub session_id: SessionNumber,
    pub stage: String,
    pub stage_objective: String,
    pub client_utterances_count: usize,
    pub evidence_utterances_count: usize,
    pub ccd: Option<Ccd>,
    pub status: CcdStatus,
    pub error: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CcdReport {
    pub case_id: CaseId,
    pub model: String,
    pub system_prompt_path: Option<String>,
    pub cumulative: bool,
    pub include_intake: bool,
    pub sessions: Vec<SessionCcd>,
}

impl CcdReport {
    pub fn failed(&self) -> usize {
        self.sessions.iter().filter(|s| s.status == CcdStatus::Fail).count()
    }
}

pub struct CcdExtractor {
    provider: Arc<dyn LlmProvider>,
    options: GenerateOptions,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CcdExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: &CcdSettings, timeout: Duration) -> Self {
        Self {
            provider,
            options: GenerateOptions {
                max_tokens: None,
                temperature: settings.temperature,
                json_mode: true,
                timeout,
            },
            max_attempts: settings.max_attempts.max(1),
            retry_delay: Duration::from_millis(800),
        }
    }

    /// Base pause between attempts; grows linearly with the attempt number.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// One CCD from the given client utterances.
    pub async fn extract_from_utterances(
        &self,
        utterances: &[String],
        system_prefix: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Ccd, CcdError> {
        let evidence = render_evidence(utterances);
        let mut last = String::new();

        for attempt in 1..=self.max_attempts {
            let request = build_request(&evidence, system_prefix, attempt > 1);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CcdError::Cancelled),
                result = tokio::time::timeout(self.options.timeout, self.provider.generate(&request, &self.options)) => {
                    result.unwrap_or(Err(GenerationError::Timeout(self.options.timeout)))
                }
            };

            match outcome {
                Ok(completion) => match Ccd::parse_strict(&completion.text) {
                    Ok(ccd) => return Ok(ccd),
                    Err(e) => last = e.to_string(),
                },
                Err(GenerationError::Cancelled) => return Err(CcdError::Cancelled),
                Err(e) if e.is_fatal() => return Err(CcdError::Generation(e)),
                Err(e) => last = e.to_string(),
            }
            warn!(attempt, error = %last, "CCD attempt failed");

            if attempt < self.max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(CcdError::Cancelled),
                    _ = tokio::time::sleep(self.retry_delay * attempt) => {}
                }
            }
        }

        Err(CcdError::Exhausted {
            attempts: self.max_attempts,
            last,
        })
    }

    /// One CCD per session of the bundle. Evidence is that session's client turns,
    /// or everything up to it when `cumulative`; the intake's turns are prepended
    /// when `include_intake`. Per-session failures are recorded, not returned.
    pub async fn extract_sessions(
        &self,
        bundle: &TranscriptBundle,
        cumulative: bool,
        include_intake: bool,
        cancel: &CancellationToken,
    ) -> Result<CcdReport, CcdError> {
        let prefix = bundle
            .system_prompt_path
            .as_deref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        let mut carried = if include_intake {
            client_utterances(&bundle.s0_dialogue)
        } else {
            Vec::new()
        };
        let mut sessions = Vec::with_capacity(bundle.sessions.len());

        for record in &bundle.sessions {
            let own = client_utterances(&record.dialogue);
            let evidence: Vec<String> = if cumulative {
                carried.iter().chain(&own).cloned().collect()
            } else {
                own.clone()
            };

            let (ccd, status, error) = match self.extract_from_utterances(&evidence, prefix.as_deref(), cancel).await {
                Ok(ccd) => (Some(ccd), CcdStatus::Ok, None),
                Err(e @ (CcdError::Cancelled | CcdError::Generation(_))) => return Err(e),
                Err(e) => (None, CcdStatus::Fail, Some(e.to_string())),
            };
            info!(case_id = %bundle.case_id, session_id = %record.session_id, ?status, "CCD extracted");

            sessions.push(SessionCcd {
                session_id: record.session_id,
                stage: record.stage.clone(),
                stage_objective: record.stage_objective.clone(),
                client_utterances_count: own.len(),
                evidence_utterances_count: evidence.len(),
                ccd,
                status,
                error,
            });
            // Carried forward only after extraction, so each session sees its predecessors.
            carried.extend(own);
        }

        Ok(CcdReport {
            case_id: bundle.case_id.clone(),
            model: self.provider.model().to_string(),
            system_prompt_path: bundle.system_prompt_path.clone(),
            cumulative,
            include_intake,
            sessions,
        })
    }
}

pub fn client_utterances(dialogue: &[DialogueTurn]) -> Vec<String> {
    dialogue
        .iter()
        .filter(|t| t.role == Role::Client)
        .map(|t| t.content.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn render_evidence(utterances: &[String]) -> String {
    if utterances.is_empty() {
        return NO_EVIDENCE.to_string();
    }
    utterances.iter().map(|u| format!("- {u}")).collect::<Vec<_>>().join("\n")
}

fn build_request(evidence: &str, system_prefix: Option<&str>, repair: bool) -> PromptRequest {
    let mut request = PromptRequest::empty();
    if let Some(prefix) = system_prefix {
        request.push_system(BlockLabel::Custom("CASE PROMPT".into()), prefix);
    }
    request.push_system(BlockLabel::CorePrompt, CCD_PROMPT);
    if repair {
        request.push_section(
            BlockLabel::RepairDirectives,
            format!(
                "Your previous output was invalid. Return ONLY valid JSON with EXACTLY these keys: {}. No extra keys. No markdown.",
                CCD_KEYS.join(", ")
            ),
        );
    }
    request.push_section(BlockLabel::Custom("CLIENT UTTERANCES".into()), evidence);
    request
}
