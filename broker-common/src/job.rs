//! Job records and the lifecycle they move through.
//!
//! A `Job` is one submitted prompt together with its execution state. Status
//! moves through the edges below, and every mutating query in the store is
//! guarded on the expected prior status, so a transition can never be observed
//! in reverse:
//!
//! ```text
//! queued -> running -> completed
//!                   -> waiting_llm -> completed | retrying | exhausted | post_processing_failed
//!                   -> retrying -> running | exhausted
//!                   -> exhausted
//!                   -> post_processing_failed
//! any non-terminal -> cancelled
//! ```

use std::str::FromStr;
use std::time;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use thiserror::Error;
use uuid::Uuid;

/// Enumeration of parsing errors for job fields.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0} is not a valid JobStatus")]
    ParseJobStatusError(String),
    #[error("{0} is not a valid ApiMethod")]
    ParseApiMethodError(String),
}

/// Enumeration of possible statuses for a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status")]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// A job that is waiting in the dispatch queue to be picked up by a worker.
    Queued,
    /// A job claimed by a worker and currently executing a provider call.
    Running,
    /// A job submitted to the asynchronous provider, waiting for its callback.
    WaitingLlm,
    /// A job that failed with a retryable error and will be re-claimed.
    Retrying,
    /// A job whose model output was delivered (and post-processed, if any).
    Completed,
    /// A job that ran out of retry attempts.
    Exhausted,
    /// The model succeeded but the domain write failed. Raw output preserved.
    PostProcessingFailed,
    /// A job cancelled by an external actor.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::WaitingLlm => "waiting_llm",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Exhausted => "exhausted",
            JobStatus::PostProcessingFailed => "post_processing_failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are never left again by normal flow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Exhausted
                | JobStatus::PostProcessingFailed
                | JobStatus::Cancelled
        )
    }
}

impl FromStr for JobStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "waiting_llm" => Ok(JobStatus::WaitingLlm),
            "retrying" => Ok(JobStatus::Retrying),
            "completed" => Ok(JobStatus::Completed),
            "exhausted" => Ok(JobStatus::Exhausted),
            "post_processing_failed" => Ok(JobStatus::PostProcessingFailed),
            "cancelled" => Ok(JobStatus::Cancelled),
            invalid => Err(ParseError::ParseJobStatusError(invalid.to_owned())),
        }
    }
}

/// Which provider API surface a job is submitted through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApiMethod {
    Chat,
    Responses,
}

impl FromStr for ApiMethod {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(ApiMethod::Chat),
            "responses" => Ok(ApiMethod::Responses),
            invalid => Err(ParseError::ParseApiMethodError(invalid.to_owned())),
        }
    }
}

/// One submitted prompt and its execution state, as stored in the jobs table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    /// A unique id identifying a job.
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    /// The provider backend this job is assigned to.
    pub provider_slug: String,
    /// Selects a registered post-processor, if any.
    pub feature_slug: Option<String>,
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Optional structured conversation overriding the single prompt.
    pub messages: Option<Json<Value>>,
    /// Free-form passthrough options. Protected keys are stripped before the
    /// bag is spread onto a provider call.
    pub input: Json<Map<String, Value>>,
    pub api_method: ApiMethod,
    pub model: Option<String>,
    pub status: JobStatus,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Provider-assigned response id, set once on background submission and
    /// immutable for the life of the submission.
    pub llm_response_id: Option<String>,
    pub result: Option<Json<Value>>,
    pub error_message: Option<String>,
    /// Opaque tenant context handed to post-processors.
    pub context: Json<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

/// A new job being created by the ingress handler.
/// Ownership is taken on insert to enforce a submission is only created once.
#[derive(Debug)]
pub struct NewJob {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub provider_slug: String,
    pub feature_slug: Option<String>,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub messages: Option<Value>,
    pub input: Map<String, Value>,
    pub api_method: ApiMethod,
    pub model: Option<String>,
    pub context: Map<String, Value>,
}

/// Static catalog row describing a provider backend.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProviderConfig {
    pub slug: String,
    /// "sync" providers respond inline; "async" providers deliver a callback.
    pub kind: ProviderKind,
    pub active: bool,
    pub timeout_seconds: i32,
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
    /// Opaque settings bag: default model, max tokens, base url override.
    pub config: Json<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Sync,
    Async,
}

impl ProviderConfig {
    pub fn default_model(&self) -> Option<&str> {
        self.config.get("default_model").and_then(Value::as_str)
    }

    pub fn max_tokens(&self) -> Option<u64> {
        self.config.get("max_tokens").and_then(Value::as_u64)
    }

    pub fn base_url(&self) -> Option<&str> {
        self.config.get("base_url").and_then(Value::as_str)
    }

    pub fn timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.timeout_seconds.max(0) as u64)
    }

    pub fn supports_background(&self) -> bool {
        self.kind == ProviderKind::Async
    }
}

/// What to do with a job after a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transition to `retrying`; the queue message is left for redelivery.
    Retry,
    /// Transition to `exhausted`; the queue message is archived.
    Exhaust,
}

impl RetryDecision {
    /// A failure is retried iff the normalized error is retryable and the job
    /// has attempts remaining under the provider's cap.
    pub fn for_failure(retryable: bool, retry_count: i32, max_retries: i32) -> Self {
        if retryable && retry_count < max_retries {
            RetryDecision::Retry
        } else {
            RetryDecision::Exhaust
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::WaitingLlm,
            JobStatus::Retrying,
            JobStatus::Completed,
            JobStatus::Exhausted,
            JobStatus::PostProcessingFailed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }

        assert!(matches!(
            "sleeping".parse::<JobStatus>(),
            Err(ParseError::ParseJobStatusError(_))
        ));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Exhausted.is_terminal());
        assert!(JobStatus::PostProcessingFailed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());

        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::WaitingLlm.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_retry_decision() {
        assert_eq!(
            RetryDecision::for_failure(true, 0, 3),
            RetryDecision::Retry
        );
        assert_eq!(
            RetryDecision::for_failure(true, 2, 3),
            RetryDecision::Retry
        );
        // Cap reached.
        assert_eq!(
            RetryDecision::for_failure(true, 3, 3),
            RetryDecision::Exhaust
        );
        // Non-retryable errors exhaust regardless of remaining attempts.
        assert_eq!(
            RetryDecision::for_failure(false, 0, 3),
            RetryDecision::Exhaust
        );
    }
}
