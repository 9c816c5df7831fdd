use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::prompt::PromptRequest;
use cbtsynth_core::provider::{Completion, GenerateOptions, LlmProvider};
use cbtsynth_settings::RetrySettings;

/// Transport-level retry and circuit breaker settings.
///
/// These retries happen inside a single generation attempt: the repair loop
/// above only sees the final error once they are exhausted.
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl ReliableConfig {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.transport_retries,
            base_delay: Duration::from_millis(settings.backoff_base_ms),
            max_delay: Duration::from_millis(settings.backoff_max_ms),
            jitter_factor: settings.jitter_factor,
            circuit_breaker_threshold: settings.circuit_breaker_threshold,
            circuit_breaker_cooldown: Duration::from_millis(settings.circuit_breaker_cooldown_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a provider with retry on transient errors and a circuit breaker.
///
/// - Fatal errors are returned immediately
/// - Retryable errors back off exponentially with jitter, honoring `retry_after`
/// - N consecutive failures open the circuit; after the cooldown one probe is let through
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    circuit_state: RwLock<CircuitState>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit_state: RwLock::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn check_circuit(&self) -> Result<(), GenerationError> {
        let state = self.circuit_state.read();
        match &*state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { since } if since.elapsed() >= self.config.circuit_breaker_cooldown => {
                drop(state);
                *self.circuit_state.write() = CircuitState::HalfOpen;
                Ok(())
            }
            CircuitState::Open { .. } => Err(GenerationError::ProviderOverloaded),
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut state = self.circuit_state.write();
        if *state != CircuitState::Closed {
            info!("circuit breaker closed after successful request");
            *state = CircuitState::Closed;
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures < self.config.circuit_breaker_threshold {
            return;
        }
        let mut state = self.circuit_state.write();
        if !matches!(*state, CircuitState::Open { .. }) {
            warn!(
                failures,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "circuit breaker opened"
            );
            *state = CircuitState::Open { since: Instant::now() };
        }
    }

    /// `base * 2^attempt`, capped, then scaled by `1 ± jitter_factor`.
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }
        let exp = self.config.base_delay.as_millis() as f64 * 2f64.powi(attempt.min(30) as i32);
        let capped = exp.min(self.config.max_delay.as_millis() as f64);
        let spread = capped * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(1.0) as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match &*self.circuit_state.read() {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn context_window(&self) -> usize {
        self.inner.context_window()
    }

    async fn generate(
        &self,
        request: &PromptRequest,
        options: &GenerateOptions,
    ) -> Result<Completion, GenerationError> {
        self.check_circuit()?;

        let mut attempt = 0;
        loop {
            let err = match self.inner.generate(request, options).await {
                Ok(completion) => {
                    self.record_success();
                    return Ok(completion);
                }
                Err(e) => e,
            };

            if err.is_fatal() || !err.is_retryable() || attempt >= self.config.max_retries {
                self.record_failure();
                return Err(err);
            }

            let delay = self.retry_delay(attempt, err.suggested_delay());
            let _ = self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                retry = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying generation after transport error"
            );
            tokio::time::sleep(delay).await;
            self.check_circuit()?;
            attempt += 1;
        }
    }
}
