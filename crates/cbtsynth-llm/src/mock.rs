use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::prompt::PromptRequest;
use cbtsynth_core::provider::{Completion, GenerateOptions, LlmProvider};

/// Scripted responses for deterministic runs without network access.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Error(GenerationError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Returns its scripted responses in order and records every request it sees.
pub struct MockProvider {
    responses: Vec<MockResponse>,
    model: String,
    call_count: AtomicUsize,
    requests: Mutex<Vec<PromptRequest>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses,
            model: "mock-model".to_string(),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The same text for every call.
    pub fn repeating(text: &str, times: usize) -> Self {
        Self::new(vec![MockResponse::text(text); times])
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<PromptRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<PromptRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        128_000
    }

    async fn generate(
        &self,
        request: &PromptRequest,
        _options: &GenerateOptions,
    ) -> Result<Completion, GenerationError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut current) = self.responses.get(idx) else {
            return Err(GenerationError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };
        loop {
            match current {
                MockResponse::Text(text) => return Ok(Completion::text(&self.model, text.clone())),
                MockResponse::Error(e) => return Err(e.clone()),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner.as_ref();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbtsynth_core::prompt::BlockLabel;

    #[tokio::test]
    async fn sequential_responses_and_recording() {
        let mock = MockProvider::new(vec![MockResponse::text("first"), MockResponse::text("second")]);
        let mut req = PromptRequest::empty();
        req.push_section(BlockLabel::TargetStage, "S1");

        let a = mock.generate(&req, &GenerateOptions::default()).await.unwrap();
        let b = mock.generate(&PromptRequest::empty(), &GenerateOptions::default()).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.requests()[0], req);
        assert!(mock.last_request().unwrap().sections.is_empty());
    }

    #[tokio::test]
    async fn exhausted_script_is_fatal() {
        let mock = MockProvider::new(vec![]);
        let err = mock
            .generate(&PromptRequest::empty(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn repeating_text() {
        let mock = MockProvider::repeating("same", 3);
        for _ in 0..3 {
            let out = mock
                .generate(&PromptRequest::empty(), &GenerateOptions::default())
                .await
                .unwrap();
            assert_eq!(out.text, "same");
        }
        assert!(mock
            .generate(&PromptRequest::empty(), &GenerateOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn scripted_error() {
        let mock = MockProvider::new(vec![MockResponse::Error(GenerationError::ProviderOverloaded)]);
        let err = mock
            .generate(&PromptRequest::empty(), &GenerateOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::ProviderOverloaded);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_response_waits() {
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::text("late"),
        )])
        .with_model("slow");
        let start = tokio::time::Instant::now();
        let out = mock
            .generate(&PromptRequest::empty(), &GenerateOptions::default())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(out.text, "late");
        assert_eq!(out.model, "slow");
    }
}
