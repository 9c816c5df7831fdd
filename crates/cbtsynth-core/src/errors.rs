use std::time::Duration;

/// Failures of the text-generation backend.
/// Classified as fatal (abort the run), retryable (consume an attempt), or neither.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GenerationError {
    // Fatal
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Retryable
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("empty response from generator")]
    EmptyResponse,

    #[error("cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::ProviderOverloaded
                | Self::NetworkError(_)
                | Self::Timeout(_)
                | Self::EmptyResponse
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_) | Self::InvalidRequest(_))
    }

    pub fn suggested_delay(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            *retry_after
        } else {
            None
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::EmptyResponse => "empty_response",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            408 => Self::Timeout(Duration::ZERO),
            429 => Self::RateLimited { retry_after: None },
            503 | 529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GenerationError::RateLimited { retry_after: None }.is_retryable());
        assert!(GenerationError::ServerError { status: 500, body: "err".into() }.is_retryable());
        assert!(GenerationError::ProviderOverloaded.is_retryable());
        assert!(GenerationError::NetworkError("tcp".into()).is_retryable());
        assert!(GenerationError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(GenerationError::EmptyResponse.is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(GenerationError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(GenerationError::InvalidRequest("bad".into()).is_fatal());
        assert!(!GenerationError::Timeout(Duration::ZERO).is_fatal());
    }

    #[test]
    fn cancelled_is_neither() {
        let cancelled = GenerationError::Cancelled;
        assert!(!cancelled.is_retryable());
        assert!(!cancelled.is_fatal());
    }

    #[test]
    fn suggested_delay_only_for_rate_limit() {
        let rl = GenerationError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(rl.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(GenerationError::ProviderOverloaded.suggested_delay(), None);
    }

    #[test]
    fn from_status_mapping() {
        assert!(GenerationError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(GenerationError::from_status(400, "bad request".into()).is_fatal());
        assert!(GenerationError::from_status(429, "slow down".into()).is_retryable());
        assert!(GenerationError::from_status(503, "unavailable".into()).is_retryable());
        assert!(GenerationError::from_status(502, "bad gateway".into()).is_retryable());
        assert!(matches!(
            GenerationError::from_status(418, "teapot".into()),
            GenerationError::InvalidRequest(_)
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(GenerationError::Cancelled.error_kind(), "cancelled");
        assert_eq!(GenerationError::Timeout(Duration::ZERO).error_kind(), "timeout");
        assert_eq!(GenerationError::EmptyResponse.error_kind(), "empty_response");
    }
}
