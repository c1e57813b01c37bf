//! Callback receiver.
//!
//! Invoked by the async provider (and by the dead-letter replay driver).
//! Always answers `200 OK` with body `OK` so the vendor stops retrying, and
//! never leaks internal state to the caller. Before any mutating work the
//! payload passes a chain of guards, each of which trips into a diagnostic
//! log entry and a silent ack:
//!
//! 1. authenticity (signature, constant-time)
//! 2. job existence (payload metadata, else response-id lookup)
//! 3. idempotency (uniqueness on `(provider_slug, webhook_id)`)
//! 4. cancellation
//! 5. terminal state
//! 6. stale response id
//!
//! Idempotency is recorded as soon as the job is known, before the state
//! guards, so the second delivery of an already-processed callback reads as
//! `duplicate_webhook` rather than as a late event, and so the record exists
//! before any mutating work. Replay requests skip authenticity and
//! idempotency: the stored payload already passed both when it first arrived.
//!
//! Any non-guard failure while processing (a response retrieval timing out,
//! the store erroring mid-dispatch) files the verbatim payload into the DLQ
//! for later replay and logs `processing_error`.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, instrument};
use uuid::Uuid;

use broker_common::diagnostics::DiagnosticEvent;
use broker_common::error::DatabaseError;
use broker_common::job::{Job, JobStatus, RetryDecision};
use broker_common::notify::{notify_best_effort, JobNotification, NotificationKind};
use broker_common::processors::tenant_scoped_context;
use broker_gateway::callback::{parse_callback, CallbackEvent, CallbackKind};
use broker_gateway::error::{code_for_tag, ErrorCode, LlmError};
use broker_gateway::types::LlmResult;

use super::app::AppState;
use crate::auth::verify_queue_secret;

/// What the receiver did with a callback. The HTTP answer is `200 OK`
/// regardless; this drives diagnostics and replay resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Guard(&'static str),
    Completed,
    Retried,
    Exhausted,
    PostProcessingFailed,
    Skipped,
    ProcessingError,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    pub provider: Option<String>,
    pub source: Option<String>,
}

#[derive(Error, Debug)]
enum ReceiverError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error("{0}")]
    Malformed(String),
}

impl ReceiverError {
    fn code(&self) -> Option<&'static str> {
        match self {
            ReceiverError::Provider(e) => Some(e.code.as_str()),
            ReceiverError::Database(_) | ReceiverError::Malformed(_) => None,
        }
    }
}

#[instrument(skip_all, fields(provider, source))]
pub async fn receive(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if query.source.as_deref() == Some("dlq") {
        tracing::Span::current().record("source", "dlq");
        replay_dlq_entry(&state, &headers, &body).await;
    } else {
        let provider_slug = query
            .provider
            .clone()
            .unwrap_or_else(|| "async-c".to_owned());
        tracing::Span::current().record("provider", provider_slug.as_str());
        handle_callback(&state, &provider_slug, &headers, &body).await;
    }

    (StatusCode::OK, "OK")
}

/// The live-callback entry: verify authenticity, then process.
pub(crate) async fn handle_callback(
    state: &AppState,
    provider_slug: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Receipt {
    let Some(client) = state.providers.get(provider_slug) else {
        trip_guard(
            state,
            "signature_invalid",
            DiagnosticEvent::new("signature_invalid")
                .provider(provider_slug)
                .error(None, "no client registered for provider"),
        )
        .await;
        return Receipt::Guard("signature_invalid");
    };

    if let Err(e) = client.verify_callback(headers, body) {
        trip_guard(
            state,
            "signature_invalid",
            DiagnosticEvent::new("signature_invalid")
                .provider(provider_slug)
                .error(Some(e.code.as_str()), &e.message),
        )
        .await;
        return Receipt::Guard("signature_invalid");
    }

    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            // Keep what we can for replay.
            let raw = Value::String(String::from_utf8_lossy(body).into_owned());
            return processing_error(
                state,
                provider_slug,
                None,
                &ReceiverError::Malformed(format!("payload is not valid JSON: {e}")),
                &raw,
            )
            .await;
        }
    };

    process_payload(state, provider_slug, &payload, true).await
}

/// Shared by the live path and the replay path. `record_idempotency` is
/// false on replay.
pub(crate) async fn process_payload(
    state: &AppState,
    provider_slug: &str,
    payload: &Value,
    record_idempotency: bool,
) -> Receipt {
    let event = match parse_callback(payload) {
        Ok(event) => event,
        Err(e) => {
            return processing_error(
                state,
                provider_slug,
                None,
                &ReceiverError::Malformed(e.to_string()),
                payload,
            )
            .await;
        }
    };

    if event.kind == CallbackKind::Other {
        trip_guard(
            state,
            "unhandled_event",
            DiagnosticEvent::new("unhandled_event")
                .provider(provider_slug)
                .error(None, &event.event_type)
                .payload(payload),
        )
        .await;
        return Receipt::Guard("unhandled_event");
    }

    match process_event(state, provider_slug, payload, &event, record_idempotency).await {
        Ok(receipt) => receipt,
        Err(e) => processing_error(state, provider_slug, event.job_id, &e, payload).await,
    }
}

async fn process_event(
    state: &AppState,
    provider_slug: &str,
    payload: &Value,
    event: &CallbackEvent,
    record_idempotency: bool,
) -> Result<Receipt, ReceiverError> {
    // Job existence: payload metadata first, then the response-id lookup.
    let mut job = None;
    if let Some(job_id) = event.job_id {
        job = state.store.get_job(job_id).await?;
    }
    if job.is_none() {
        if let Some(response_id) = &event.response_id {
            job = state.store.find_job_by_response_id(response_id).await?;
        }
    }
    let Some(job) = job else {
        trip_guard(
            state,
            "unknown_job",
            DiagnosticEvent::new("unknown_job")
                .provider(provider_slug)
                .response_ids(None, event.response_id.as_deref())
                .payload(payload),
        )
        .await;
        return Ok(Receipt::Guard("unknown_job"));
    };

    // Idempotency, recorded before any mutating work.
    if record_idempotency {
        let fresh = state
            .store
            .record_webhook(
                provider_slug,
                &event.webhook_id,
                Some(job.id),
                &event.event_type,
            )
            .await?;
        if !fresh {
            trip_guard(
                state,
                "duplicate_webhook",
                DiagnosticEvent::new("duplicate_webhook")
                    .provider(provider_slug)
                    .job(job.id)
                    .tenant(job.tenant_id)
                    .status_at_receipt(job.status),
            )
            .await;
            return Ok(Receipt::Guard("duplicate_webhook"));
        }
    }

    // Cancellation.
    if job.status == JobStatus::Cancelled {
        trip_guard(
            state,
            "cancelled_job_response",
            DiagnosticEvent::new("cancelled_job_response")
                .provider(provider_slug)
                .job(job.id)
                .tenant(job.tenant_id)
                .status_at_receipt(job.status)
                .payload(payload),
        )
        .await;
        return Ok(Receipt::Guard("cancelled_job_response"));
    }

    // Terminal state.
    if job.status.is_terminal() {
        let guard = if event.kind == CallbackKind::Completed {
            "late_success_ignored"
        } else {
            "late_failure_response"
        };
        trip_guard(
            state,
            guard,
            DiagnosticEvent::new(guard)
                .provider(provider_slug)
                .job(job.id)
                .tenant(job.tenant_id)
                .status_at_receipt(job.status),
        )
        .await;
        return Ok(Receipt::Guard(guard));
    }

    // Stale response id: a callback for a previous attempt.
    if let (Some(expected), Some(received)) = (&job.llm_response_id, &event.response_id) {
        if expected != received {
            trip_guard(
                state,
                "stale_response",
                DiagnosticEvent::new("stale_response")
                    .provider(provider_slug)
                    .job(job.id)
                    .tenant(job.tenant_id)
                    .status_at_receipt(job.status)
                    .response_ids(Some(expected), Some(received)),
            )
            .await;
            return Ok(Receipt::Guard("stale_response"));
        }
    }

    match event.kind {
        CallbackKind::Completed => handle_success(state, &job, event).await,
        CallbackKind::Failed | CallbackKind::Incomplete => {
            handle_failure(state, &job, event).await
        }
        CallbackKind::Other => Ok(Receipt::Guard("unhandled_event")),
    }
}

async fn handle_success(
    state: &AppState,
    job: &Job,
    event: &CallbackEvent,
) -> Result<Receipt, ReceiverError> {
    // Callbacks that carry only an id require retrieving the full body.
    let result = if let Some(output) = &event.output {
        LlmResult {
            output: output.clone(),
            usage: event.usage.clone(),
            model: None,
            response_id: event.response_id.clone(),
        }
    } else {
        let response_id = event.response_id.as_ref().ok_or_else(|| {
            ReceiverError::Malformed("success callback carried neither output nor id".to_owned())
        })?;
        let provider = state
            .store
            .get_provider(&job.provider_slug)
            .await?
            .ok_or_else(|| {
                ReceiverError::Malformed(format!("no catalog row for {}", job.provider_slug))
            })?;
        let client = state.providers.get(&provider.slug).ok_or_else(|| {
            ReceiverError::Malformed(format!("no client registered for {}", provider.slug))
        })?;
        client.fetch_response(&provider, response_id).await?
    };

    let processor = job
        .feature_slug
        .as_deref()
        .and_then(|slug| state.processors.resolve(slug));

    if let Some(processor) = processor {
        // Same pre-processor status check as the worker: re-read before any
        // domain write so a cancellation mid-flight never reaches one.
        let status = state.store.get_job_status(job.id).await?;
        if status != Some(JobStatus::WaitingLlm) {
            trip_guard(
                state,
                "post_processing_skipped",
                DiagnosticEvent::new("post_processing_skipped")
                    .provider(&job.provider_slug)
                    .job(job.id)
                    .tenant(job.tenant_id),
            )
            .await;
            return Ok(Receipt::Skipped);
        }

        let context = tenant_scoped_context(job);
        if let Err(processor_error) = processor
            .apply(state.store.pool(), &result.output, &context)
            .await
        {
            let applied = state
                .store
                .fail_post_processing(
                    job.id,
                    JobStatus::WaitingLlm,
                    &result.to_value(),
                    &processor_error.to_string(),
                )
                .await?;
            if !applied {
                return Ok(Receipt::Skipped);
            }

            metrics::counter!("llm_webhook_post_processing_failed").increment(1);
            notify_best_effort(
                state.notifier.as_ref(),
                JobNotification::for_job(job, NotificationKind::PostProcessingFailed),
            )
            .await;
            return Ok(Receipt::PostProcessingFailed);
        }
    }

    let applied = state
        .store
        .complete_job(job.id, JobStatus::WaitingLlm, &result.to_value())
        .await?;
    if !applied {
        return Ok(Receipt::Skipped);
    }

    metrics::counter!("llm_webhook_completed").increment(1);
    notify_best_effort(
        state.notifier.as_ref(),
        JobNotification::for_job(job, NotificationKind::Completed),
    )
    .await;

    Ok(Receipt::Completed)
}

async fn handle_failure(
    state: &AppState,
    job: &Job,
    event: &CallbackEvent,
) -> Result<Receipt, ReceiverError> {
    let provider = state
        .store
        .get_provider(&job.provider_slug)
        .await?
        .ok_or_else(|| {
            ReceiverError::Malformed(format!("no catalog row for {}", job.provider_slug))
        })?;

    // Use the inline error detail when present; otherwise retrieve it.
    let error = if let Some(message) = &event.error_message {
        let code = event
            .error_code
            .as_deref()
            .and_then(code_for_tag)
            .unwrap_or(ErrorCode::Unknown);
        LlmError::new(&job.provider_slug, code, message)
    } else if let Some(response_id) = &event.response_id {
        let client = state.providers.get(&provider.slug).ok_or_else(|| {
            ReceiverError::Malformed(format!("no client registered for {}", provider.slug))
        })?;
        match client.fetch_response(&provider, response_id).await {
            // The provider said failed but the fetch came back clean; treat
            // as an unclassified failure rather than trusting either side.
            Ok(_) => LlmError::new(
                &job.provider_slug,
                ErrorCode::Unknown,
                "failure callback for a retrievable response",
            ),
            Err(detail) => detail,
        }
    } else {
        LlmError::new(
            &job.provider_slug,
            ErrorCode::Unknown,
            "failure callback carried no detail",
        )
    };

    match RetryDecision::for_failure(error.is_retryable(), job.retry_count, provider.max_retries) {
        RetryDecision::Retry => {
            // The worker deleted the original message after submission, so
            // the retry helper both transitions and re-enqueues.
            let applied = state
                .store
                .retry_from_webhook(&state.queue, job.id, &error.to_string())
                .await?;
            if !applied {
                return Ok(Receipt::Skipped);
            }
            metrics::counter!("llm_webhook_retried").increment(1);
            Ok(Receipt::Retried)
        }
        RetryDecision::Exhaust => {
            let applied = state
                .store
                .exhaust_job(job.id, JobStatus::WaitingLlm, &error.to_string())
                .await?;
            if !applied {
                return Ok(Receipt::Skipped);
            }
            metrics::counter!("llm_webhook_exhausted").increment(1);
            notify_best_effort(
                state.notifier.as_ref(),
                JobNotification::for_job(job, NotificationKind::Exhausted),
            )
            .await;
            Ok(Receipt::Exhausted)
        }
    }
}

/// Replay entry for stored dead-letter payloads, authenticated by the worker
/// shared secret. Signature and idempotency checks are deliberately skipped:
/// the payload already passed both when it first arrived.
async fn replay_dlq_entry(state: &AppState, headers: &HeaderMap, body: &Bytes) {
    #[derive(Deserialize)]
    struct ReplayRequest {
        dlq_id: i64,
        webhook_payload: Value,
        provider_slug: String,
    }

    if verify_queue_secret(headers, &state.queue_secret).is_err() {
        state
            .store
            .log_event(DiagnosticEvent::new("replay_unauthorized"))
            .await;
        return;
    }

    let request: ReplayRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            state
                .store
                .log_event(
                    DiagnosticEvent::new("replay_malformed")
                        .error(None, &format!("replay body is not valid JSON: {e}")),
                )
                .await;
            return;
        }
    };

    let receipt = process_payload(
        state,
        &request.provider_slug,
        &request.webhook_payload,
        false,
    )
    .await;

    // Guard trips count as resolution: the job moved on without this
    // payload. Only a fresh processing error leaves the entry pending.
    if receipt != Receipt::ProcessingError {
        match state.store.resolve_dlq_entry(request.dlq_id).await {
            Ok(_) => {
                metrics::counter!("llm_dlq_replay_resolved").increment(1);
            }
            Err(e) => error!(dlq_id = request.dlq_id, "failed to resolve dlq entry: {}", e),
        }
    }
}

async fn trip_guard(state: &AppState, guard: &'static str, event: DiagnosticEvent) {
    metrics::counter!("llm_webhook_guard_trips", &[("guard", guard)]).increment(1);
    state.store.log_event(event).await;
}

async fn processing_error(
    state: &AppState,
    provider_slug: &str,
    job_id: Option<Uuid>,
    error: &ReceiverError,
    payload: &Value,
) -> Receipt {
    error!(provider_slug, ?job_id, "callback processing error: {}", error);
    metrics::counter!("llm_webhook_processing_errors").increment(1);

    state
        .store
        .log_event(
            DiagnosticEvent::new("processing_error")
                .provider(provider_slug)
                .error(error.code(), &error.to_string())
                .payload(payload),
        )
        .await;

    // The DLQ keeps the payload verbatim; only the diagnostic log is
    // sanitized.
    if let Err(e) = state
        .store
        .add_dlq_entry(
            job_id,
            provider_slug,
            error.code(),
            &error.to_string(),
            payload,
        )
        .await
    {
        error!("failed to file callback payload into dlq: {}", e);
    }

    Receipt::ProcessingError
}
