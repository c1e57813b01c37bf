//! Normalized provider errors.
//!
//! Every raw failure out of a provider backend is mapped onto one taxonomy so
//! the worker and the callback receiver can make the retry-or-exhaust
//! decision without provider-specific knowledge. Classification applies, in
//! order: provider error-class tags, HTTP status, a timeout-name heuristic,
//! a network-error heuristic, and finally `UNKNOWN`.

use std::error::Error as StdError;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Normalized error codes. `retryable` is a fixed attribute of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthenticationFailed,
    RateLimited,
    ContextLengthExceeded,
    ContentFiltered,
    InvalidRequest,
    ModelNotFound,
    ProviderUnavailable,
    Timeout,
    WebhookVerificationFailed,
    BackgroundNotSupported,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ContextLengthExceeded => "CONTEXT_LENGTH_EXCEEDED",
            ErrorCode::ContentFiltered => "CONTENT_FILTERED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ModelNotFound => "MODEL_NOT_FOUND",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::WebhookVerificationFailed => "WEBHOOK_VERIFICATION_FAILED",
            ErrorCode::BackgroundNotSupported => "BACKGROUND_NOT_SUPPORTED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Whether a later attempt could resolve the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited | ErrorCode::ProviderUnavailable | ErrorCode::Timeout
        )
    }
}

/// A normalized provider failure. The original cause is kept for diagnostic
/// logging only and is never serialized to clients.
#[derive(Error, Debug)]
#[error("{provider} call failed ({}): {message}", .code.as_str())]
pub struct LlmError {
    pub code: ErrorCode,
    pub provider: String,
    pub message: String,
    pub status_code: Option<u16>,
    #[source]
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl LlmError {
    pub fn new(provider: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            provider: provider.to_owned(),
            message: message.into(),
            status_code: None,
            cause: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn timeout(provider: &str, timeout_seconds: u64) -> Self {
        Self::new(
            provider,
            ErrorCode::Timeout,
            format!("provider call exceeded the {timeout_seconds}s deadline"),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Map a provider error-class tag to a normalized code. Tags take precedence
/// over HTTP status because providers reuse 400 for very different failures.
pub fn code_for_tag(tag: &str) -> Option<ErrorCode> {
    match tag {
        "authentication_error" | "invalid_api_key" | "permission_error" => {
            Some(ErrorCode::AuthenticationFailed)
        }
        "rate_limit_error" | "rate_limit_exceeded" | "insufficient_quota" => {
            Some(ErrorCode::RateLimited)
        }
        "context_length_exceeded" | "max_output_tokens" | "string_above_max_length" => {
            Some(ErrorCode::ContextLengthExceeded)
        }
        "content_filter" | "content_policy_violation" => Some(ErrorCode::ContentFiltered),
        "invalid_request_error" | "invalid_value" => Some(ErrorCode::InvalidRequest),
        "not_found_error" | "model_not_found" => Some(ErrorCode::ModelNotFound),
        "overloaded_error" | "server_error" | "api_error" => Some(ErrorCode::ProviderUnavailable),
        "timeout" | "timeout_error" => Some(ErrorCode::Timeout),
        _ => None,
    }
}

/// Map an HTTP status to a normalized code.
pub fn code_for_status(status: u16) -> Option<ErrorCode> {
    match status {
        400 => Some(ErrorCode::InvalidRequest),
        401 | 403 => Some(ErrorCode::AuthenticationFailed),
        404 => Some(ErrorCode::ModelNotFound),
        408 => Some(ErrorCode::Timeout),
        413 => Some(ErrorCode::ContextLengthExceeded),
        422 => Some(ErrorCode::InvalidRequest),
        429 => Some(ErrorCode::RateLimited),
        451 => Some(ErrorCode::ContentFiltered),
        status if status >= 500 => Some(ErrorCode::ProviderUnavailable),
        _ => None,
    }
}

/// Classify a non-2xx provider response from its status and body text.
///
/// Providers wrap errors as `{"error": {"type"/"code": ..., "message": ...}}`
/// or `{"type": "error", "error": {...}}`; both shapes are probed for an
/// error-class tag before falling back to the HTTP status.
pub fn classify_http_error(provider: &str, status: u16, body: &str) -> LlmError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error_obj = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .filter(|v| v.is_object());

    let tag = error_obj.and_then(|e| {
        e.get("type")
            .and_then(Value::as_str)
            .or_else(|| e.get("code").and_then(Value::as_str))
    });

    let message = error_obj
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| format!("provider returned HTTP {status}"));

    let code = tag
        .and_then(code_for_tag)
        .or_else(|| code_for_status(status))
        .unwrap_or(ErrorCode::Unknown);

    LlmError::new(provider, code, message).with_status(status)
}

/// Classify a transport-level failure: timeouts first, then the usual
/// network failure modes (connection reset, DNS, refused, hang-up).
pub fn classify_transport_error(provider: &str, error: reqwest::Error) -> LlmError {
    let code = if error.is_timeout() {
        ErrorCode::Timeout
    } else if error.is_connect() || is_network_error(&error) {
        ErrorCode::ProviderUnavailable
    } else {
        ErrorCode::Unknown
    };

    let message = error.to_string();
    LlmError::new(provider, code, message).with_cause(error)
}

fn is_network_error(error: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_lowercase();
        if text.contains("connection reset")
            || text.contains("connection refused")
            || text.contains("dns")
            || text.contains("socket hang up")
            || text.contains("broken pipe")
        {
            return true;
        }
        source = cause.source();
    }
    false
}
