use std::time::Duration;

use serde_json::{json, Value};

use cbtsynth_core::errors::GenerationError;
use cbtsynth_core::prompt::PromptRequest;
use cbtsynth_core::provider::{Completion, FinishReason, GenerateOptions, TokenUsage};

/// Convert a prompt into an OpenAI chat-completions request body.
///
/// System blocks collapse into a single system message; sections become the
/// user message.
pub fn build_request_body(request: &PromptRequest, options: &GenerateOptions, model: &str) -> Value {
    let mut messages = Vec::with_capacity(2);
    let system = request.system_text();
    if !system.is_empty() {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.user_text()}));

    let mut body = json!({
        "model": model,
        "messages": messages,
    });
    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(crate::models::clamp_max_tokens(model, max));
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }
    if options.json_mode {
        body["response_format"] = json!({"type": "json_object"});
    }
    body
}

/// Extract the first choice's text from a chat-completions response.
pub fn parse_response(body: &Value, fallback_model: &str) -> Result<Completion, GenerationError> {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        return Err(GenerationError::InvalidRequest(message.to_string()));
    }

    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or(GenerationError::EmptyResponse)?;

    let text = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }

    let usage = body.get("usage").map(|u| TokenUsage {
        input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        output_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
    });

    Ok(Completion {
        text: text.to_string(),
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(fallback_model)
            .to_string(),
        usage,
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(FinishReason::parse),
    })
}

/// `Retry-After` in whole or fractional seconds. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbtsynth_core::prompt::BlockLabel;

    fn request() -> PromptRequest {
        let mut req = PromptRequest::empty();
        req.push_system(BlockLabel::CorePrompt, "You write counseling sessions.");
        req.push_section(BlockLabel::TargetStage, "S2 Identify Thoughts");
        req
    }

    #[test]
    fn body_has_system_and_user_messages() {
        let opts = GenerateOptions {
            max_tokens: Some(6000),
            temperature: Some(0.7),
            ..Default::default()
        };
        let body = build_request_body(&request(), &opts, "gpt-4o-mini");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .starts_with("TARGET STAGE:"));
        assert_eq!(body["max_tokens"], 6000);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn body_without_system_or_json_mode() {
        let mut req = PromptRequest::empty();
        req.push_section(BlockLabel::CaseProfile, "Name: Maya");
        let opts = GenerateOptions {
            json_mode: false,
            ..Default::default()
        };
        let body = build_request_body(&req, &opts, "local");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("response_format").is_none());
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parses_first_choice() {
        let body = json!({
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"message": {"role": "assistant", "content": "{\"a\":1}"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 1200}
        });
        let c = parse_response(&body, "gpt-4o-mini").unwrap();
        assert_eq!(c.text, "{\"a\":1}");
        assert_eq!(c.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(c.finish_reason, Some(FinishReason::Stop));
        assert_eq!(c.usage.unwrap().output_tokens, 1200);
    }

    #[test]
    fn blank_or_missing_content_is_empty_response() {
        let blank = json!({"choices": [{"message": {"content": "  "}}]});
        assert_eq!(parse_response(&blank, "m"), Err(GenerationError::EmptyResponse));
        let refusal = json!({"choices": [{"message": {"content": null, "refusal": "no"}}]});
        assert_eq!(parse_response(&refusal, "m"), Err(GenerationError::EmptyResponse));
        assert_eq!(parse_response(&json!({}), "m"), Err(GenerationError::EmptyResponse));
    }

    #[test]
    fn error_body_is_invalid_request() {
        let body = json!({"error": {"message": "context length exceeded"}});
        assert!(matches!(
            parse_response(&body, "m"),
            Err(GenerationError::InvalidRequest(m)) if m.contains("context length")
        ));
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
