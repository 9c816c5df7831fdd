//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial; missing fields keep their compiled defaults.

mod style;

pub use style::StyleRules;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthSettings {
    /// Settings schema version.
    pub version: String,
    pub generation: GenerationSettings,
    pub retry: RetrySettings,
    pub style: StyleRules,
    pub planner: PlannerSettings,
    pub prompt: PromptSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
    pub batch: BatchSettings,
    pub ccd: CcdSettings,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            generation: GenerationSettings::default(),
            retry: RetrySettings::default(),
            style: StyleRules::default(),
            planner: PlannerSettings::default(),
            prompt: PromptSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
            batch: BatchSettings::default(),
            ccd: CcdSettings::default(),
        }
    }
}

impl SynthSettings {
    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        self.style.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue("retry.maxAttempts must be >= 1".into()));
        }
        if self.batch.max_concurrent_cases == 0 {
            return Err(SettingsError::InvalidValue(
                "batch.maxConcurrentCases must be >= 1".into(),
            ));
        }
        if let Some(t) = self.generation.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(SettingsError::InvalidValue(format!(
                    "generation.temperature must be in [0, 2], got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// Text-generation backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub json_mode: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: Some(0.7),
            max_tokens: 6000,
            timeout_ms: 120_000,
            json_mode: true,
        }
    }
}

/// Repair-loop budget and transport retry behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Generation calls per session, repairs included.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_factor: f64,
    /// Extra transport-level retries inside a single attempt.
    pub transport_retries: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 20_000,
            jitter_factor: 0.2,
            transport_retries: 1,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerSettings {
    /// How many times a stage may be repeated for incomplete homework.
    pub max_stage_repeats: u32,
    /// Artifact phrases that signal incomplete homework.
    pub homework_incomplete_markers: Vec<String>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_stage_repeats: 1,
            homework_incomplete_markers: [
                "homework: incomplete",
                "homework incomplete",
                "homework not completed",
                "homework not done",
                "homework was not done",
                "incomplete homework",
                "did not complete the homework",
                "didn't complete the homework",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptSettings {
    /// Replaces the built-in system prompt when set.
    pub system_prompt_path: Option<String>,
    /// Most recent sessions included verbatim; older ones are summarized.
    pub verbatim_sessions: usize,
    pub summary_max_chars: usize,
    pub intake_max_chars: usize,
    pub previous_output_max_chars: usize,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            system_prompt_path: None,
            verbatim_sessions: 2,
            summary_max_chars: 700,
            intake_max_chars: 8000,
            previous_output_max_chars: 12_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: home_dir().join("database/cbtsynth.db").display().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// JSON lines on stderr instead of human-readable output.
    pub json: bool,
    /// Persist WARN and above to a SQLite log database.
    pub persist_warnings: bool,
    pub log_db_path: String,
    pub metrics_enabled: bool,
    pub metrics_db_path: String,
    pub metrics_retention_days: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        let home = home_dir();
        Self {
            level: "info".to_string(),
            json: false,
            persist_warnings: true,
            log_db_path: home.join("database/logs.db").display().to_string(),
            metrics_enabled: true,
            metrics_db_path: home.join("database/metrics.db").display().to_string(),
            metrics_retention_days: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSettings {
    pub max_concurrent_cases: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_cases: 4,
        }
    }
}

/// Cognitive conceptualization extraction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CcdSettings {
    /// Falls back to `generation.model` when unset.
    pub model: Option<String>,
    pub max_attempts: u32,
    /// Use all client utterances up to each session instead of that session alone.
    pub cumulative: bool,
    pub include_intake: bool,
    pub temperature: Option<f64>,
}

impl Default for CcdSettings {
    fn default() -> Self {
        Self {
            model: None,
            max_attempts: 3,
            cumulative: false,
            include_intake: false,
            temperature: Some(0.0),
        }
    }
}

/// `~/.cbtsynth`, falling back to `/tmp/.cbtsynth` without a HOME.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".cbtsynth")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = SynthSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.generation.model, "gpt-4o-mini");
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.planner.max_stage_repeats, 1);
        assert_eq!(settings.prompt.verbatim_sessions, 2);
        assert!(settings.storage.database_path.ends_with("cbtsynth.db"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut settings = SynthSettings::default();
        settings.retry.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(SynthSettings::default()).unwrap();
        assert!(v["retry"]["maxAttempts"].is_number());
        assert!(v["style"]["backReferencePhrases"].is_array());
        assert!(v["batch"]["maxConcurrentCases"].is_number());
    }
}
