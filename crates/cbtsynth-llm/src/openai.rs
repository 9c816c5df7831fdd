use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::prompt::PromptRequest;
use cbtsynth_core::provider::{Completion, GenerateOptions, LlmProvider};
use cbtsynth_core::security::ApiKey;
use cbtsynth_settings::GenerationSettings;

use crate::converter;
use crate::models;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat-completions backend. Works against OpenAI and any server exposing the
/// same `/chat/completions` shape.
pub struct OpenAiProvider {
    client: Client,
    api_key: ApiKey,
    base_url: String,
    model: String,
    context_window: usize,
}

impl OpenAiProvider {
    pub fn new(api_key: ApiKey, model: &str, base_url: &str) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            context_window: models::context_window_for(model),
        })
    }

    /// Build from settings, reading the key from `settings.api_key_env`.
    pub fn from_settings(settings: &GenerationSettings) -> Result<Self, GenerationError> {
        let api_key = ApiKey::from_env(&settings.api_key_env).ok_or_else(|| {
            GenerationError::AuthenticationFailed(format!("{} is not set", settings.api_key_env))
        })?;
        Self::new(api_key, &settings.model, &settings.base_url)
    }

    /// Same credentials and endpoint, different model.
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: model.to_string(),
            context_window: models::context_window_for(model),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    #[instrument(skip(self, request, options), fields(model = %self.model))]
    async fn generate(
        &self,
        request: &PromptRequest,
        options: &GenerateOptions,
    ) -> Result<Completion, GenerationError> {
        let body = converter::build_request_body(request, options, &self.model);
        debug!(prompt_chars = request.char_len(), "sending chat completion");

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose())
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e, options.timeout))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(converter::parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(match GenerationError::from_status(status, body) {
                GenerationError::RateLimited { .. } => GenerationError::RateLimited { retry_after },
                other => other,
            });
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| transport_error(&e, options.timeout))?;
        converter::parse_response(&value, &self.model)
    }
}

fn transport_error(e: &reqwest::Error, timeout: Duration) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout(timeout)
    } else {
        GenerationError::NetworkError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let p = OpenAiProvider::new(ApiKey::new("k"), "gpt-4o", "http://localhost:8000/v1/").unwrap();
        assert_eq!(p.endpoint(), "http://localhost:8000/v1/chat/completions");
        assert_eq!(p.name(), "openai");
        assert_eq!(p.context_window(), 128_000);
    }

    #[test]
    fn with_model_keeps_endpoint() {
        let p = OpenAiProvider::new(ApiKey::new("k"), "gpt-4o", "https://api.openai.com/v1").unwrap();
        let q = p.with_model("local-extractor");
        assert_eq!(q.model(), "local-extractor");
        assert_eq!(q.endpoint(), p.endpoint());
        assert_eq!(q.context_window(), models::FALLBACK_CONTEXT_WINDOW);
    }

    #[test]
    fn missing_key_is_fatal() {
        let settings = GenerationSettings {
            api_key_env: "CBTSYNTH_TEST_UNSET_KEY".into(),
            ..GenerationSettings::default()
        };
        let err = OpenAiProvider::from_settings(&settings).err().unwrap();
        assert!(err.is_fatal());
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn live_completion() {
        use cbtsynth_core::prompt::BlockLabel;

        let provider = OpenAiProvider::from_settings(&GenerationSettings::default()).unwrap();
        let mut req = PromptRequest::empty();
        req.push_section(BlockLabel::OutputContract, "Reply with the JSON object {\"ok\": true}.");
        let out = provider.generate(&req, &GenerateOptions::default()).await.unwrap();
        assert!(out.text.contains("ok"));
    }
}
