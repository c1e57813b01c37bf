//! The queue-draining worker.
//!
//! Each invocation leases a batch of dispatch messages, claims the referenced
//! jobs, and executes the per-provider path. All coordination with concurrent
//! cancellations and other workers goes through the store's guarded updates:
//! whenever a guard fails the worker treats the job as cancelled, releases the
//! message, and reports `skipped`.
//!
//! Queue-message lifecycle: delete on success, archive on non-retryable
//! failure, and leave the message in place on retryable failure so the
//! visibility timeout redelivers it. Delete/archive failures are only logged;
//! the message will redeliver and the claim guard makes that harmless.

use std::sync::Arc;
use std::time;

use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use broker_common::job::{Job, JobStatus, ProviderConfig, ProviderKind, RetryDecision};
use broker_common::notify::{notify_best_effort, JobNotification, NotificationKind, Notifier};
use broker_common::processors::{tenant_scoped_context, ProcessorRegistry};
use broker_common::queue::{DispatchQueue, QueueMessage};
use broker_common::store::JobStore;
use broker_gateway::client::{with_deadline, ProviderClient, ProviderRegistry};
use broker_gateway::error::LlmError;
use broker_gateway::types::{LlmRequest, LlmResult};

use crate::error::WorkerError;

/// How long a leased message stays invisible before redelivery.
pub const VISIBILITY_TIMEOUT_SECONDS: u32 = 300;
/// The maximum number of messages leased per invocation.
pub const DEQUEUE_BATCH_SIZE: i64 = 10;

/// Everything a worker invocation needs. Constructed once at startup; tests
/// substitute fields with fakes.
pub struct WorkerContext {
    pub store: JobStore,
    pub queue: DispatchQueue,
    pub providers: ProviderRegistry,
    pub processors: ProcessorRegistry,
    pub notifier: Arc<dyn Notifier>,
}

/// The outcome recorded for one leased message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    WaitingLlm,
    Retrying,
    Exhausted,
    PostProcessingFailed,
    Skipped,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct JobReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub status: JobOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobReport {
    fn new(job_id: Option<Uuid>, status: JobOutcome) -> Self {
        Self {
            job_id,
            status,
            message: None,
        }
    }

    fn with_message(job_id: Option<Uuid>, status: JobOutcome, message: &str) -> Self {
        Self {
            job_id,
            status,
            message: Some(message.to_owned()),
        }
    }
}

/// The summary returned to the invoker.
#[derive(Debug, Serialize)]
pub struct DrainSummary {
    pub processed: bool,
    pub count: usize,
    pub results: Vec<JobReport>,
}

/// Lease a batch and process it sequentially. Per-job failures are reported
/// in the summary; only store errors on the initial read abort the
/// invocation.
pub async fn drain_queue(ctx: &WorkerContext) -> Result<DrainSummary, WorkerError> {
    let messages = ctx
        .queue
        .read(VISIBILITY_TIMEOUT_SECONDS, DEQUEUE_BATCH_SIZE)
        .await?;

    if messages.is_empty() {
        return Ok(DrainSummary {
            processed: false,
            count: 0,
            results: Vec::new(),
        });
    }

    let mut results = Vec::with_capacity(messages.len());
    for message in messages {
        results.push(process_message(ctx, message).await);
    }

    Ok(DrainSummary {
        processed: true,
        count: results.len(),
        results,
    })
}

/// Run the worker as a continuous poller.
pub async fn run(ctx: &WorkerContext, poll_interval: time::Duration) {
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        interval.tick().await;

        match drain_queue(ctx).await {
            Ok(summary) if summary.processed => {
                debug!(count = summary.count, "drained dispatch queue batch");
            }
            Ok(_) => {}
            Err(e) => {
                error!("error while draining dispatch queue: {}", e);
            }
        }
    }
}

async fn process_message(ctx: &WorkerContext, message: QueueMessage) -> JobReport {
    let Some(job_id) = message.job_id() else {
        // Nothing to claim. Keep the message for inspection, out of the way.
        archive_message(ctx, message.msg_id).await;
        metrics::counter!("llm_jobs_skipped").increment(1);
        return JobReport::with_message(None, JobOutcome::Skipped, "message payload lacks a job id");
    };

    match process_job(ctx, &message, job_id).await {
        Ok(report) => report,
        Err(e) => {
            // The lease is kept; the message redelivers after the visibility
            // timeout and the claim guard decides what is left to do.
            metrics::counter!("llm_jobs_database_error").increment(1);
            error!(%job_id, "error processing dispatch message: {}", e);
            JobReport::with_message(Some(job_id), JobOutcome::Failed, &e.to_string())
        }
    }
}

async fn process_job(
    ctx: &WorkerContext,
    message: &QueueMessage,
    job_id: Uuid,
) -> Result<JobReport, WorkerError> {
    let Some(job) = ctx.store.claim_job(job_id).await? else {
        delete_message(ctx, message.msg_id).await;
        metrics::counter!("llm_jobs_skipped").increment(1);
        return Ok(JobReport::with_message(
            Some(job_id),
            JobOutcome::Skipped,
            "job is not claimable",
        ));
    };

    let labels = [("provider", job.provider_slug.clone())];
    metrics::counter!("llm_jobs_total", &labels).increment(1);

    let provider = match ctx.store.get_provider(&job.provider_slug).await? {
        Some(provider) if provider.active => Some(provider),
        _ => None,
    };
    let client = provider.as_ref().and_then(|p| ctx.providers.get(&p.slug));
    let request = LlmRequest::from_job(&job);

    let (Some(provider), Some(client), Some(request)) = (provider, client, request) else {
        // Misconfigured job: no catalog row, no client, or no resolved
        // model. There is nothing to retry against.
        let applied = ctx
            .store
            .exhaust_job(job.id, JobStatus::Running, "provider not executable for this job")
            .await?;
        delete_message(ctx, message.msg_id).await;
        metrics::counter!("llm_jobs_exhausted", &labels).increment(1);
        let outcome = if applied {
            JobOutcome::Failed
        } else {
            JobOutcome::Skipped
        };
        return Ok(JobReport::with_message(
            Some(job.id),
            outcome,
            "provider not executable for this job",
        ));
    };

    notify_best_effort(
        ctx.notifier.as_ref(),
        JobNotification::for_job(&job, NotificationKind::Started),
    )
    .await;

    let now = tokio::time::Instant::now();

    let report = match provider.kind {
        ProviderKind::Sync => {
            run_sync_job(ctx, message, &job, &provider, client.as_ref(), &request).await?
        }
        ProviderKind::Async => {
            run_async_job(ctx, message, &job, &provider, client.as_ref(), &request).await?
        }
    };

    metrics::histogram!("llm_jobs_processing_duration_seconds", &labels)
        .record(now.elapsed().as_secs_f64());

    Ok(report)
}

/// Synchronous provider path: the call returns the output inline, the
/// post-processor handshake runs, and the job completes in this invocation.
async fn run_sync_job(
    ctx: &WorkerContext,
    message: &QueueMessage,
    job: &Job,
    provider: &ProviderConfig,
    client: &dyn ProviderClient,
    request: &LlmRequest,
) -> Result<JobReport, WorkerError> {
    let call = client.execute(request, provider);
    match with_deadline(&job.provider_slug, provider.timeout(), call).await {
        Ok(result) => handle_sync_success(ctx, message, job, &result).await,
        Err(error) => apply_retry_policy(ctx, message, job, provider, &error).await,
    }
}

async fn handle_sync_success(
    ctx: &WorkerContext,
    message: &QueueMessage,
    job: &Job,
    result: &LlmResult,
) -> Result<JobReport, WorkerError> {
    let labels = [("provider", job.provider_slug.clone())];

    let processor = job
        .feature_slug
        .as_deref()
        .and_then(|slug| ctx.processors.resolve(slug));

    if let Some(processor) = processor {
        // Re-read the status before any domain write: a job cancelled while
        // the provider call was in flight must not reach a post-processor.
        let status = ctx.store.get_job_status(job.id).await?;
        if status != Some(JobStatus::Running) {
            delete_message(ctx, message.msg_id).await;
            metrics::counter!("llm_jobs_skipped", &labels).increment(1);
            return Ok(JobReport::with_message(
                Some(job.id),
                JobOutcome::Skipped,
                "job no longer running before post-processing",
            ));
        }

        let context = tenant_scoped_context(job);
        if let Err(processor_error) = processor
            .apply(ctx.store.pool(), &result.output, &context)
            .await
        {
            // The model succeeded; only the domain write failed. Terminal,
            // no retry: the tokens are already spent, and the raw output is
            // preserved for manual recovery.
            let applied = ctx
                .store
                .fail_post_processing(
                    job.id,
                    JobStatus::Running,
                    &result.to_value(),
                    &processor_error.to_string(),
                )
                .await?;
            delete_message(ctx, message.msg_id).await;

            if !applied {
                metrics::counter!("llm_jobs_skipped", &labels).increment(1);
                return Ok(JobReport::new(Some(job.id), JobOutcome::Skipped));
            }

            metrics::counter!("llm_jobs_post_processing_failed", &labels).increment(1);
            notify_best_effort(
                ctx.notifier.as_ref(),
                JobNotification::for_job(job, NotificationKind::PostProcessingFailed),
            )
            .await;
            return Ok(JobReport::with_message(
                Some(job.id),
                JobOutcome::PostProcessingFailed,
                &processor_error.to_string(),
            ));
        }
    }

    let applied = ctx
        .store
        .complete_job(job.id, JobStatus::Running, &result.to_value())
        .await?;
    delete_message(ctx, message.msg_id).await;

    if !applied {
        metrics::counter!("llm_jobs_skipped", &labels).increment(1);
        return Ok(JobReport::with_message(
            Some(job.id),
            JobOutcome::Skipped,
            "job was cancelled before completion",
        ));
    }

    metrics::counter!("llm_jobs_completed", &labels).increment(1);
    notify_best_effort(
        ctx.notifier.as_ref(),
        JobNotification::for_job(job, NotificationKind::Completed),
    )
    .await;

    Ok(JobReport::new(Some(job.id), JobOutcome::Completed))
}

/// Asynchronous provider path: submit in background mode and hand completion
/// over to the callback receiver.
async fn run_async_job(
    ctx: &WorkerContext,
    message: &QueueMessage,
    job: &Job,
    provider: &ProviderConfig,
    client: &dyn ProviderClient,
    request: &LlmRequest,
) -> Result<JobReport, WorkerError> {
    let labels = [("provider", job.provider_slug.clone())];

    let call = client.submit_background(request, provider, job.id);
    match with_deadline(&job.provider_slug, provider.timeout(), call).await {
        Ok(response_id) => {
            let applied = ctx.store.mark_waiting_llm(job.id, &response_id).await?;
            // Completion is driven by the callback receiver from here on.
            delete_message(ctx, message.msg_id).await;

            if !applied {
                metrics::counter!("llm_jobs_skipped", &labels).increment(1);
                return Ok(JobReport::with_message(
                    Some(job.id),
                    JobOutcome::Skipped,
                    "job was cancelled before submission completed",
                ));
            }

            metrics::counter!("llm_jobs_submitted", &labels).increment(1);
            Ok(JobReport::new(Some(job.id), JobOutcome::WaitingLlm))
        }
        Err(error) => apply_retry_policy(ctx, message, job, provider, &error).await,
    }
}

/// The shared retry policy. Retryable failures under the cap move the job to
/// `retrying` and leave the message for the visibility timeout to redeliver;
/// everything else exhausts the job and archives the message.
async fn apply_retry_policy(
    ctx: &WorkerContext,
    message: &QueueMessage,
    job: &Job,
    provider: &ProviderConfig,
    error: &LlmError,
) -> Result<JobReport, WorkerError> {
    let labels = [("provider", job.provider_slug.clone())];

    match RetryDecision::for_failure(error.is_retryable(), job.retry_count, provider.max_retries) {
        RetryDecision::Retry => {
            let applied = ctx
                .store
                .retry_job(job.id, JobStatus::Running, &error.to_string())
                .await?;

            if !applied {
                delete_message(ctx, message.msg_id).await;
                metrics::counter!("llm_jobs_skipped", &labels).increment(1);
                return Ok(JobReport::with_message(
                    Some(job.id),
                    JobOutcome::Skipped,
                    "job was cancelled during a failed attempt",
                ));
            }

            // The message stays leased; redelivery is the retry schedule.
            metrics::counter!("llm_jobs_retried", &labels).increment(1);
            Ok(JobReport::with_message(
                Some(job.id),
                JobOutcome::Retrying,
                &error.to_string(),
            ))
        }
        RetryDecision::Exhaust => {
            let applied = ctx
                .store
                .exhaust_job(job.id, JobStatus::Running, &error.to_string())
                .await?;

            if !applied {
                delete_message(ctx, message.msg_id).await;
                metrics::counter!("llm_jobs_skipped", &labels).increment(1);
                return Ok(JobReport::with_message(
                    Some(job.id),
                    JobOutcome::Skipped,
                    "job was cancelled during a failed attempt",
                ));
            }

            archive_message(ctx, message.msg_id).await;
            metrics::counter!("llm_jobs_exhausted", &labels).increment(1);
            notify_best_effort(
                ctx.notifier.as_ref(),
                JobNotification::for_job(job, NotificationKind::Exhausted),
            )
            .await;
            Ok(JobReport::with_message(
                Some(job.id),
                JobOutcome::Exhausted,
                &error.to_string(),
            ))
        }
    }
}

async fn delete_message(ctx: &WorkerContext, msg_id: i64) {
    if let Err(e) = ctx.queue.delete(msg_id).await {
        error!(msg_id, "failed to delete dispatch message: {}", e);
    }
}

async fn archive_message(ctx: &WorkerContext, msg_id: i64) {
    if let Err(e) = ctx.queue.archive(msg_id).await {
        error!(msg_id, "failed to archive dispatch message: {}", e);
    }
}
