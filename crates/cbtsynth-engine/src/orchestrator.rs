//! The repair loop. Plans a session, generates, validates, and either commits
//! or feeds the violations back into the next attempt until the budget runs out.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use cbtsynth_core::case::CaseProfile;
use cbtsynth_core::constraint::{ConstraintResult, Severity, ViolationKind};
use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::events::SynthesisEvent;
use cbtsynth_core::ids::CaseId;
use cbtsynth_core::prompt::PromptRequest;
use cbtsynth_core::provider::{Completion, GenerateOptions, LlmProvider};
use cbtsynth_core::session::SessionRecord;
use cbtsynth_core::stage::StagePlan;
use cbtsynth_settings::SynthSettings;
use cbtsynth_store::{CaseStore, StoreError};
use cbtsynth_telemetry::MetricsRecorder;

use crate::attempt::GenerationAttempt;
use crate::composer::PromptComposer;
use crate::constraints::ConstraintRegistry;
use crate::error::{SynthesisError, SynthesisFailure};
use crate::planner::StagePlanner;
use crate::validator::Validator;

/// Rule id under which the store's commit-time fact scan reports.
pub const STORE_CONTINUITY_RULE: &str = "continuity.store";

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Generation calls per session, repairs included.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_factor: f64,
    pub generate: GenerateOptions,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &SynthSettings) -> Self {
        let generation = &settings.generation;
        Self {
            max_attempts: settings.retry.max_attempts.max(1),
            backoff_base: Duration::from_millis(settings.retry.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.retry.backoff_max_ms),
            jitter_factor: settings.retry.jitter_factor,
            generate: GenerateOptions {
                max_tokens: Some(generation.max_tokens),
                temperature: generation.temperature,
                json_mode: generation.json_mode,
                timeout: Duration::from_millis(generation.timeout_ms),
            },
        }
    }

    /// `base * 2^(n-1)`, capped, then scaled by `1 ± jitter_factor`.
    fn backoff(&self, failed_attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.backoff_max);
        }
        let exp = self.backoff_base.as_millis() as f64 * 2f64.powi(failed_attempt.saturating_sub(1).min(30) as i32);
        let capped = exp.min(self.backoff_max.as_millis() as f64);
        let spread = capped * self.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

pub struct Orchestrator {
    store: Arc<CaseStore>,
    provider: Arc<dyn LlmProvider>,
    planner: StagePlanner,
    composer: PromptComposer,
    validator: Validator,
    config: OrchestratorConfig,
    event_tx: broadcast::Sender<SynthesisEvent>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<CaseStore>,
        provider: Arc<dyn LlmProvider>,
        settings: &SynthSettings,
    ) -> Result<Self, SynthesisError> {
        let style = Arc::new(settings.style.clone());
        let registry = Arc::new(ConstraintRegistry::standard());
        let composer = PromptComposer::from_settings(style.clone(), registry.clone(), settings.prompt.clone())
            .map_err(|e| SynthesisError::Config(format!("system prompt: {e}")))?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            store,
            provider,
            planner: StagePlanner::from_settings(&settings.planner),
            composer,
            validator: Validator::new(registry, style),
            config: OrchestratorConfig::from_settings(settings),
            event_tx,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Swap the rule set used for both prompting and validation.
    pub fn with_registry(mut self, registry: ConstraintRegistry) -> Self {
        let registry = Arc::new(registry);
        let style = self.composer.style().clone();
        self.validator = Validator::new(registry.clone(), style);
        self.composer = self.composer.with_registry(registry);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SynthesisEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<CaseStore> {
        &self.store
    }

    pub fn metrics(&self) -> Option<&Arc<MetricsRecorder>> {
        self.metrics.as_ref()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The plan `synthesize_next` would use, or `None` once the arc is complete.
    pub fn plan_next(&self, case_id: &CaseId) -> Result<Option<StagePlan>, SynthesisError> {
        let profile = self.store.get_case(case_id)?;
        let history = self.store.get_history(case_id)?;
        Ok(self.planner.plan_next(&profile, &history)?)
    }

    #[instrument(skip(self, cancel), fields(case_id = %case_id))]
    pub async fn synthesize_next(
        &self,
        case_id: &CaseId,
        cancel: &CancellationToken,
    ) -> Result<SessionRecord, SynthesisError> {
        let profile = self.store.get_case(case_id)?;
        let history = self.store.get_history(case_id)?;
        let plan = self
            .planner
            .plan_next(&profile, &history)?
            .ok_or_else(|| SynthesisError::ArcComplete(case_id.clone()))?;
        self.run(case_id, &profile, &history, &plan, cancel).await
    }

    /// Synthesize against an explicit plan. The plan must target the next ordinal.
    #[instrument(skip(self, plan, cancel), fields(case_id = %case_id, session_id = %plan.session_id))]
    pub async fn synthesize_with_plan(
        &self,
        case_id: &CaseId,
        plan: &StagePlan,
        cancel: &CancellationToken,
    ) -> Result<SessionRecord, SynthesisError> {
        let profile = self.store.get_case(case_id)?;
        let history = self.store.get_history(case_id)?;
        let expected = history.len() as u32;
        if plan.session_id.get() != expected {
            return Err(SynthesisError::Sequence {
                expected,
                found: plan.session_id.get(),
            });
        }
        self.run(case_id, &profile, &history, plan, cancel).await
    }

    /// Run `synthesize_next` until the planner reports the arc complete.
    pub async fn synthesize_arc(
        &self,
        case_id: &CaseId,
        cancel: &CancellationToken,
    ) -> Result<Vec<SessionRecord>, SynthesisError> {
        self.synthesize_sessions(case_id, None, cancel).await
    }

    /// At most `limit` sessions (all remaining when `None`); stops early when the arc completes.
    pub async fn synthesize_sessions(
        &self,
        case_id: &CaseId,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<SessionRecord>, SynthesisError> {
        let mut committed = Vec::new();
        while limit.map_or(true, |n| committed.len() < n) {
            match self.synthesize_next(case_id, cancel).await {
                Ok(record) => committed.push(record),
                Err(SynthesisError::ArcComplete(_)) => break,
                Err(e) => return Err(e),
            }
        }
        info!(case_id = %case_id, sessions = committed.len(), "synthesis run finished");
        Ok(committed)
    }

    async fn run(
        &self,
        case_id: &CaseId,
        profile: &CaseProfile,
        history: &[SessionRecord],
        plan: &StagePlan,
        cancel: &CancellationToken,
    ) -> Result<SessionRecord, SynthesisError> {
        let session_id = plan.session_id;
        self.send_event(SynthesisEvent::PlanSelected {
            case_id: case_id.clone(),
            session_id,
            stage: plan.stage.clone(),
            repeated: plan.repeated,
        });
        info!(stage = %plan.stage, repeated = plan.repeated, "stage planned");

        let budget = self.config.max_attempts;
        let mut previous: Option<GenerationAttempt> = None;
        let mut last_rejected: Option<GenerationAttempt> = None;
        let mut last_error: Option<GenerationError> = None;

        for number in 1..=budget {
            if cancel.is_cancelled() {
                return Err(self.cancelled(case_id, plan, number - 1));
            }

            let prompt = match &last_rejected {
                Some(rejected) => self.composer.compose_repair(profile, history, plan, rejected),
                None => self.composer.compose(profile, history, plan),
            };
            let attempt = match &previous {
                Some(prev) => prev.next(prompt),
                None => GenerationAttempt::first(prompt),
            };
            self.send_event(SynthesisEvent::AttemptStarted {
                case_id: case_id.clone(),
                session_id,
                attempt: number,
                repair: last_rejected.is_some(),
            });
            debug!(attempt = number, prompt_chars = attempt.prompt.char_len(), "generating");

            let completion = match self.generate(&attempt.prompt, cancel).await {
                Ok(completion) => completion,
                Err(GenerationError::Cancelled) => return Err(self.cancelled(case_id, plan, number)),
                Err(e) if e.is_fatal() => {
                    self.record_generation_error(case_id, plan, number, &e);
                    self.abort(case_id, plan, number, &e.to_string());
                    return Err(SynthesisError::Generation(e));
                }
                Err(e) => {
                    self.record_generation_error(case_id, plan, number, &e);
                    let delay = self.config.backoff(number, e.suggested_delay());
                    last_error = Some(e.clone());
                    previous = Some(attempt.with_error(e));
                    if number < budget {
                        debug!(delay_ms = delay.as_millis() as u64, "backing off before next attempt");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(self.cancelled(case_id, plan, number)),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    continue;
                }
            };

            let validation = self.validator.validate(&completion.text, profile, history, plan);
            let mut report = validation.report;

            if let Some(record) = validation.record {
                match self.store.commit(case_id, &record) {
                    Ok(receipt) => {
                        let warnings = report.warnings().count();
                        for warning in report.warnings() {
                            debug!(rule = %warning.rule_id, detail = %warning.detail, "soft rule not met");
                        }
                        self.send_event(SynthesisEvent::SessionCommitted {
                            case_id: case_id.clone(),
                            session_id,
                            attempts: number,
                            warnings,
                        });
                        if let Some(m) = &self.metrics {
                            m.counter_inc("synthesis.committed", &[], 1);
                            m.histogram_observe("synthesis.attempts", &[], f64::from(number));
                        }
                        info!(
                            attempts = number,
                            warnings,
                            content_sha256 = %receipt.content_sha256,
                            "session committed"
                        );
                        return Ok(record);
                    }
                    Err(StoreError::Continuity { contradictions, .. }) => {
                        let detail = contradictions
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join("; ");
                        let evidence = contradictions.iter().map(|c| c.excerpt.clone()).collect();
                        report.results.push(
                            ConstraintResult::fail(
                                STORE_CONTINUITY_RULE,
                                ViolationKind::Continuity,
                                Severity::Hard,
                                format!("contradicts the case record: {detail}"),
                            )
                            .with_evidence(evidence),
                        );
                    }
                    Err(e) => {
                        let err = SynthesisError::from(e);
                        self.abort(case_id, plan, number, &err.to_string());
                        return Err(err);
                    }
                }
            }

            let rejected = attempt.with_output(completion.text, report, None);
            self.record_rejection(case_id, plan, &rejected);
            previous = Some(rejected.clone());
            last_rejected = Some(rejected);
        }

        let failure = SynthesisFailure {
            case_id: case_id.clone(),
            session_id,
            attempts: budget,
            last_report: last_rejected.and_then(|a| a.report),
            last_generation_error: last_error,
        };
        self.abort(case_id, plan, budget, &failure.to_string());
        Err(SynthesisError::Failure(Box::new(failure)))
    }

    /// One provider call under the request timeout, racing cancellation.
    async fn generate(&self, request: &PromptRequest, cancel: &CancellationToken) -> Result<Completion, GenerationError> {
        let options = &self.config.generate;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = tokio::time::timeout(options.timeout, self.provider.generate(request, options)) => {
                match result {
                    Ok(Ok(completion)) if completion.text.trim().is_empty() => Err(GenerationError::EmptyResponse),
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout(options.timeout)),
                }
            }
        }
    }

    fn record_rejection(&self, case_id: &CaseId, plan: &StagePlan, attempt: &GenerationAttempt) {
        let failed_rules: Vec<String> = attempt
            .violations()
            .into_iter()
            .filter(|v| v.is_blocking())
            .map(|v| v.rule_id.clone())
            .collect();
        warn!(attempt = attempt.number, rules = ?failed_rules, "candidate rejected");
        if let Some(m) = &self.metrics {
            for rule in &failed_rules {
                m.counter_inc("synthesis.violations", &[("rule", rule.as_str())], 1);
            }
        }
        self.send_event(SynthesisEvent::AttemptRejected {
            case_id: case_id.clone(),
            session_id: plan.session_id,
            attempt: attempt.number,
            failed_rules,
        });
    }

    fn record_generation_error(&self, case_id: &CaseId, plan: &StagePlan, attempt: u32, error: &GenerationError) {
        warn!(attempt, kind = error.error_kind(), error = %error, "generation failed");
        if let Some(m) = &self.metrics {
            m.counter_inc("generation.errors", &[("kind", error.error_kind())], 1);
        }
        self.send_event(SynthesisEvent::GenerationFailed {
            case_id: case_id.clone(),
            session_id: plan.session_id,
            attempt,
            error_kind: error.error_kind().to_string(),
            message: error.to_string(),
        });
    }

    fn abort(&self, case_id: &CaseId, plan: &StagePlan, attempts: u32, reason: &str) {
        warn!(attempts, reason, "synthesis aborted");
        if let Some(m) = &self.metrics {
            m.counter_inc("synthesis.aborted", &[], 1);
            m.histogram_observe("synthesis.attempts", &[], f64::from(attempts));
        }
        self.send_event(SynthesisEvent::SynthesisAborted {
            case_id: case_id.clone(),
            session_id: plan.session_id,
            attempts,
            reason: reason.to_string(),
        });
    }

    fn cancelled(&self, case_id: &CaseId, plan: &StagePlan, attempts: u32) -> SynthesisError {
        self.abort(case_id, plan, attempts, "cancelled");
        SynthesisError::Cancelled
    }

    fn send_event(&self, event: SynthesisEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use cbtsynth_core::prompt::BlockLabel;
    use cbtsynth_core::session::SessionNumber;
    use cbtsynth_llm::mock::{MockProvider, MockResponse};
    use cbtsynth_settings::StyleRules;

    fn settings() -> SynthSettings {
        let mut settings = SynthSettings::default();
        settings.retry.backoff_base_ms = 1;
        settings.retry.backoff_max_ms = 5;
        settings.generation.timeout_ms = 5_000;
        settings
    }

    fn setup(responses: Vec<MockResponse>) -> (Orchestrator, Arc<MockProvider>, CaseId) {
        setup_with(responses, settings())
    }

    fn setup_with(responses: Vec<MockResponse>, settings: SynthSettings) -> (Orchestrator, Arc<MockProvider>, CaseId) {
        let store = Arc::new(CaseStore::in_memory().unwrap());
        let profile = fixtures::profile("case_00001");
        store.register_case(&profile).unwrap();
        let provider = Arc::new(MockProvider::new(responses));
        let orchestrator = Orchestrator::new(store, provider.clone(), &settings).unwrap();
        (orchestrator, provider, profile.id)
    }

    fn valid_s1() -> String {
        let mut plan = fixtures::s1_plan();
        plan.session_id = SessionNumber::new(1);
        fixtures::session_json(&plan)
    }

    fn arc_plans() -> Vec<StagePlan> {
        StagePlanner::default()
            .catalog()
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                StagePlan::new(SessionNumber::new(i as u32 + 1), spec.stage, spec.objective, spec.artifact_type)
                    .with_targets(spec.targets.clone())
            })
            .collect()
    }

    #[tokio::test]
    async fn invalid_then_valid_converges() {
        let (orch, provider, case_id) = setup(vec![
            MockResponse::text("Sure! Here is the session you asked for."),
            MockResponse::text(valid_s1()),
        ]);
        let mut rx = orch.subscribe();

        let record = orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap();
        assert_eq!(record.session_id, SessionNumber::new(1));
        assert_eq!(provider.call_count(), 2);

        // The second call is a repair carrying the rejected text.
        let repair = provider.last_request().unwrap();
        assert!(repair.section(&BlockLabel::PreviousAttempt).is_some());
        assert!(repair
            .section(&BlockLabel::RepairDirectives)
            .unwrap()
            .content
            .contains("[parse.json]"));

        let history = orch.store().get_history(&case_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], record);

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type());
        }
        assert_eq!(types.first(), Some(&"plan_selected"));
        assert_eq!(types.last(), Some(&"session_committed"));
        assert!(types.contains(&"attempt_rejected"));
    }

    #[tokio::test]
    async fn committed_record_revalidates() {
        let (orch, _, case_id) = setup(vec![MockResponse::text(valid_s1())]);
        let record = orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap();

        let style = StyleRules::default();
        assert!(record.dialogue.len() >= style.min_turns && record.dialogue.len() <= style.max_turns);
        let profile = orch.store().get_case(&case_id).unwrap();
        let history = orch.store().get_history(&case_id).unwrap();
        let plan = orch.planner.plan_next(&profile, &history[..1]).unwrap().unwrap();
        let text = serde_json::to_string(&record).unwrap();
        let again = orch.validator.validate(&text, &profile, &history[..1], &plan);
        assert!(again.passed());
        assert!(again.report.get("overlap.artifact").unwrap().passed);
        assert!(again.report.get("structure.alternation").unwrap().passed);
    }

    #[tokio::test]
    async fn never_valid_aborts_with_failure() {
        let (orch, provider, case_id) = setup(vec![MockResponse::text("{\"session_id\":\"S1\"}"); 3]);
        let err = orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap_err();

        let failure = err.failure().expect("synthesis failure");
        assert_eq!(failure.attempts, 3);
        assert!(failure.failed_rules().contains(&"structure.required_keys".to_string()));
        assert!(failure.last_generation_error.is_none());
        assert_eq!(provider.call_count(), 3);
        assert_eq!(orch.store().get_history(&case_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retryable_error_consumes_an_attempt() {
        let (orch, provider, case_id) = setup(vec![
            MockResponse::Error(GenerationError::Timeout(Duration::from_secs(1))),
            MockResponse::Error(GenerationError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            }),
            MockResponse::text(valid_s1()),
        ]);
        let metrics = Arc::new(MetricsRecorder::in_memory().unwrap());
        let orch = orch.with_metrics(metrics.clone());

        orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap();
        assert_eq!(provider.call_count(), 3);
        // No output yet, so the third call is a plain compose.
        assert!(provider.last_request().unwrap().section(&BlockLabel::RepairDirectives).is_none());
        assert_eq!(metrics.counter_get("generation.errors", &[("kind", "timeout")]), 1);
        assert_eq!(metrics.counter_get("synthesis.committed", &[]), 1);
    }

    #[tokio::test]
    async fn exhausted_by_transport_errors_keeps_last_error() {
        let (orch, _, case_id) = setup(vec![MockResponse::Error(GenerationError::ProviderOverloaded); 3]);
        let err = orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap_err();
        let failure = err.failure().unwrap();
        assert!(failure.last_report.is_none());
        assert_eq!(failure.last_generation_error, Some(GenerationError::ProviderOverloaded));
    }

    #[tokio::test]
    async fn fatal_error_aborts_immediately() {
        let (orch, provider, case_id) = setup(vec![
            MockResponse::Error(GenerationError::AuthenticationFailed("bad key".into())),
            MockResponse::text(valid_s1()),
        ]);
        let err = orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Generation(GenerationError::AuthenticationFailed(_))));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_times_out() {
        let mut settings = settings();
        settings.generation.timeout_ms = 100;
        let (orch, provider, case_id) = setup_with(
            vec![
                MockResponse::delayed(Duration::from_secs(10), MockResponse::text(valid_s1())),
                MockResponse::text(valid_s1()),
            ],
            settings,
        );
        let mut rx = orch.subscribe();
        orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap();
        assert_eq!(provider.call_count(), 2);

        let mut timed_out = false;
        while let Ok(event) = rx.try_recv() {
            if let SynthesisEvent::GenerationFailed { error_kind, .. } = event {
                timed_out |= error_kind == "timeout";
            }
        }
        assert!(timed_out);
    }

    #[tokio::test]
    async fn persona_contradiction_is_repaired() {
        let mut bad: serde_json::Value = serde_json::from_str(&valid_s1()).unwrap();
        bad["dialogue"][1]["content"] = "As a teacher, I grade papers until midnight.".into();
        let (orch, provider, case_id) = setup(vec![MockResponse::text(bad.to_string()), MockResponse::text(valid_s1())]);

        orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap();
        let fixes = provider.last_request().unwrap();
        let fixes = &fixes.section(&BlockLabel::RepairDirectives).unwrap().content;
        assert!(fixes.contains("[continuity.persona]"));
    }

    #[tokio::test]
    async fn store_scan_rejection_becomes_a_violation() {
        let mut bad: serde_json::Value = serde_json::from_str(&valid_s1()).unwrap();
        bad["dialogue"][1]["content"] = "As a teacher, I grade papers until midnight.".into();
        let (orch, provider, case_id) = setup(vec![MockResponse::text(bad.to_string()), MockResponse::text(valid_s1())]);

        let mut registry = ConstraintRegistry::standard();
        registry.unregister("continuity.persona");
        registry.unregister("continuity.history");
        let orch = orch.with_registry(registry);

        orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap();
        assert_eq!(provider.call_count(), 2);
        let fixes = provider.last_request().unwrap();
        let fixes = &fixes.section(&BlockLabel::RepairDirectives).unwrap().content;
        assert!(fixes.contains(&format!("[{STORE_CONTINUITY_RULE}]")));
        assert!(fixes.contains("teacher"));
    }

    #[tokio::test]
    async fn explicit_plan_must_be_next_in_sequence() {
        let (orch, provider, case_id) = setup(vec![]);
        let mut plan = fixtures::s1_plan();
        plan.session_id = SessionNumber::new(3);
        let err = orch
            .synthesize_with_plan(&case_id, &plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Sequence { expected: 1, found: 3 }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn psychoeducation_scenario_commits() {
        let plan = fixtures::psychoeducation_plan();
        let (orch, _, case_id) = setup(vec![MockResponse::text(fixtures::session_json(&plan))]);
        let record = orch
            .synthesize_with_plan(&case_id, &plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(record.stage, "psychoeducation");
        assert_eq!(record.artifact.kind, "thought_record");
        // Off-catalog stages do not advance the arc.
        let next = orch.plan_next(&case_id).unwrap().unwrap();
        assert_eq!(next.session_id, SessionNumber::new(2));
        assert_eq!(next.stage, "Build Trust & Assessment");
    }

    #[tokio::test]
    async fn full_arc_then_complete() {
        let responses = arc_plans()
            .iter()
            .map(|plan| MockResponse::text(fixtures::session_json(plan)))
            .collect();
        let (orch, provider, case_id) = setup(responses);

        let records = orch.synthesize_arc(&case_id, &CancellationToken::new()).await.unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(provider.call_count(), 6);
        assert!(orch.plan_next(&case_id).unwrap().is_none());

        let err = orch.synthesize_next(&case_id, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SynthesisError::ArcComplete(_)));
    }

    #[tokio::test]
    async fn session_limit_stops_early() {
        let responses = arc_plans()
            .iter()
            .map(|plan| MockResponse::text(fixtures::session_json(plan)))
            .collect();
        let (orch, _, case_id) = setup(responses);
        let records = orch
            .synthesize_sessions(&case_id, Some(2), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(orch.store().get_history(&case_id).unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_generation() {
        let (orch, _, case_id) = setup(vec![MockResponse::delayed(
            Duration::from_secs(60),
            MockResponse::text(valid_s1()),
        )]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = orch.synthesize_next(&case_id, &cancel).await.unwrap_err();
        assert!(matches!(err, SynthesisError::Cancelled));
        assert_eq!(orch.store().get_history(&case_id).unwrap().len(), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = OrchestratorConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(300),
            jitter_factor: 0.0,
            generate: GenerateOptions::default(),
        };
        assert_eq!(config.backoff(1, None), Duration::from_millis(100));
        assert_eq!(config.backoff(2, None), Duration::from_millis(200));
        assert_eq!(config.backoff(5, None), Duration::from_millis(300));
        assert_eq!(config.backoff(1, Some(Duration::from_secs(9))), Duration::from_millis(300));
    }
}
