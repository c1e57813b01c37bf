//! API error and response types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use broker_common::error::DatabaseError;
use broker_common::job::JobStatus;
use broker_common::ratelimit::RateLimitStatus;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to decode request: {0}")]
    RequestDecodingError(String),
    #[error("invalid request: {0}")]
    ValidationError(String),
    #[error("no authorization token provided")]
    NoTokenError,
    #[error("provided authorization token is not valid")]
    TokenValidationError,
    #[error("provided worker secret is not valid")]
    SecretValidationError,
    #[error("monthly request quota exceeded")]
    RateLimitExceededError,
    #[error("unknown or inactive provider: {0}")]
    UnknownProviderError(String),
    #[error("provider {0} does not support background execution")]
    BackgroundNotSupportedError(String),
    #[error("job not found")]
    JobNotFoundError,
    #[error(transparent)]
    DatabaseError(#[from] DatabaseError),
}

impl ApiError {
    /// The stable machine-readable code surfaced to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RequestDecodingError(_) | ApiError::ValidationError(_) => "INVALID_REQUEST",
            ApiError::NoTokenError => "UNAUTHORIZED",
            ApiError::TokenValidationError => "FORBIDDEN",
            ApiError::SecretValidationError => "FORBIDDEN",
            ApiError::RateLimitExceededError => "RATE_LIMIT_EXCEEDED",
            ApiError::UnknownProviderError(_) => "UNKNOWN_PROVIDER",
            ApiError::BackgroundNotSupportedError(_) => "BACKGROUND_NOT_SUPPORTED",
            ApiError::JobNotFoundError => "NOT_FOUND",
            ApiError::DatabaseError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::RequestDecodingError(_)
            | ApiError::ValidationError(_)
            | ApiError::UnknownProviderError(_)
            | ApiError::BackgroundNotSupportedError(_) => StatusCode::BAD_REQUEST,
            ApiError::NoTokenError => StatusCode::UNAUTHORIZED,
            ApiError::TokenValidationError | ApiError::SecretValidationError => {
                StatusCode::FORBIDDEN
            }
            ApiError::RateLimitExceededError => StatusCode::TOO_MANY_REQUESTS,
            ApiError::JobNotFoundError => StatusCode::NOT_FOUND,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::DatabaseError(e) = &self {
            // Caller retries idempotently on 500; the detail stays server-side.
            error!("request failed with database error: {}", e);
            return (
                self.status(),
                Json(json!({"error": "internal error", "code": self.code()})),
            )
                .into_response();
        }

        (
            self.status(),
            Json(json!({"error": self.to_string(), "code": self.code()})),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct RateLimitBody {
    pub used: i32,
    pub quota: i32,
    pub remaining: i32,
}

impl From<RateLimitStatus> for RateLimitBody {
    fn from(status: RateLimitStatus) -> Self {
        Self {
            used: status.used,
            quota: status.quota,
            remaining: status.remaining(),
        }
    }
}

/// The ticket returned for an accepted submission.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub rate_limit: RateLimitBody,
}

/// The status-read view of a job.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
