//! Concurrent synthesis across independent cases. Each case runs its own
//! sequential arc; the store's per-case locks are the only shared state.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cbtsynth_core::ids::CaseId;
use cbtsynth_core::session::SessionRecord;

use crate::error::SynthesisError;
use crate::orchestrator::Orchestrator;

#[derive(Debug)]
pub struct CaseOutcome {
    pub case_id: CaseId,
    pub result: Result<Vec<SessionRecord>, SynthesisError>,
}

impl CaseOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn sessions(&self) -> usize {
        self.result.as_ref().map_or(0, Vec::len)
    }
}

/// Synthesize up to `limit` sessions per case (the whole arc when `None`),
/// with at most `max_concurrent` cases in flight. Outcomes keep input order.
pub async fn synthesize_cases(
    orchestrator: &Orchestrator,
    case_ids: &[CaseId],
    limit: Option<usize>,
    max_concurrent: usize,
    cancel: &CancellationToken,
) -> Vec<CaseOutcome> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));

    let runs = case_ids.iter().map(|case_id| {
        let permits = permits.clone();
        async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => {
                    let _in_flight = InFlight::enter(orchestrator);
                    orchestrator.synthesize_sessions(case_id, limit, cancel).await
                }
                Err(_) => Err(SynthesisError::Cancelled),
            };
            if let Err(e) = &result {
                warn!(case_id = %case_id, error = %e, "case did not finish");
            }
            CaseOutcome {
                case_id: case_id.clone(),
                result,
            }
        }
    });
    let outcomes = join_all(runs).await;

    let ok = outcomes.iter().filter(|o| o.is_ok()).count();
    info!(cases = outcomes.len(), ok, failed = outcomes.len() - ok, "batch finished");
    outcomes
}

/// Keeps the `synthesis.in_flight` gauge balanced, including on early return.
struct InFlight<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> InFlight<'a> {
    fn enter(orchestrator: &'a Orchestrator) -> Self {
        if let Some(m) = orchestrator.metrics() {
            m.gauge_add("synthesis.in_flight", &[], 1.0);
        }
        Self { orchestrator }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(m) = self.orchestrator.metrics() {
            m.gauge_add("synthesis.in_flight", &[], -1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use cbtsynth_core::errors::GenerationError;
    use cbtsynth_llm::mock::{MockProvider, MockResponse};
    use cbtsynth_settings::SynthSettings;
    use cbtsynth_store::CaseStore;
    use cbtsynth_telemetry::MetricsRecorder;

    #[tokio::test]
    async fn failures_stay_per_case() {
        let store = Arc::new(CaseStore::in_memory().unwrap());
        let ids: Vec<CaseId> = ["case_a", "case_b", "case_c"]
            .iter()
            .map(|id| {
                let profile = fixtures::profile(id);
                store.register_case(&profile).unwrap();
                profile.id
            })
            .collect();

        // Sequential with one permit: first and third cases succeed, the second hits a fatal error.
        let s1 = fixtures::session_json(&fixtures::s1_plan());
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::text(s1.clone()),
            MockResponse::Error(GenerationError::InvalidRequest("bad".into())),
            MockResponse::text(s1),
        ]));
        let metrics = Arc::new(MetricsRecorder::in_memory().unwrap());
        let orch = Orchestrator::new(store.clone(), provider, &SynthSettings::default())
            .unwrap()
            .with_metrics(metrics.clone());

        let outcomes = synthesize_cases(&orch, &ids, Some(1), 1, &CancellationToken::new()).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].case_id.as_str(), "case_a");
        assert_eq!(outcomes[0].sessions(), 1);
        assert!(matches!(outcomes[1].result, Err(SynthesisError::Generation(_))));
        assert_eq!(outcomes[2].sessions(), 1);
        assert_eq!(store.get_history(&ids[1]).unwrap().len(), 1);
        assert_eq!(metrics.gauge_get("synthesis.in_flight", &[]), 0.0);
    }
}
