//! Stale-`running` job reaper.
//!
//! A worker that crashes between claiming a job and finishing it leaves the
//! row in `running`, which the claim guard refuses to re-enter. The reaper
//! promotes jobs that have been `running` longer than the stale threshold to
//! `retrying` (or `exhausted` once attempts are spent) so the redelivered
//! queue message can re-claim them.
//!
//! A fresh message is enqueued alongside the promotion: if the original
//! message was already consumed by a claim-failure path, the job would
//! otherwise sit in `retrying` with nothing left to deliver it. A duplicate
//! message is harmless, the second claim fails and its message is deleted.

use serde::Serialize;
use tracing::{debug, warn};

use broker_common::job::{JobStatus, RetryDecision};
use broker_common::queue::DispatchQueue;
use broker_common::store::JobStore;

use crate::error::JanitorError;

const STALE_RUNNING_MESSAGE: &str = "worker lost while running; promoted by reaper";

#[derive(Debug, Default, Serialize)]
pub struct ReaperSummary {
    pub promoted: usize,
    pub exhausted: usize,
}

pub async fn promote_stale_running(
    store: &JobStore,
    queue: &DispatchQueue,
    stale_seconds: i64,
    batch_size: i64,
) -> Result<ReaperSummary, JanitorError> {
    let stale = store.stale_running_jobs(stale_seconds, batch_size).await?;
    let mut summary = ReaperSummary::default();

    for job in stale {
        let max_retries = store
            .get_provider(&job.provider_slug)
            .await?
            .map(|provider| provider.max_retries)
            .unwrap_or(0);

        // A crashed attempt counts as an attempt; otherwise a job that
        // reliably kills its worker would loop forever.
        match RetryDecision::for_failure(true, job.retry_count, max_retries) {
            RetryDecision::Retry => {
                if store
                    .retry_job(job.id, JobStatus::Running, STALE_RUNNING_MESSAGE)
                    .await?
                {
                    queue.enqueue(job.id).await?;
                    metrics::counter!("llm_jobs_reaped").increment(1);
                    debug!(job_id = %job.id, "promoted stale running job to retrying");
                    summary.promoted += 1;
                }
            }
            RetryDecision::Exhaust => {
                if store
                    .exhaust_job(job.id, JobStatus::Running, STALE_RUNNING_MESSAGE)
                    .await?
                {
                    warn!(job_id = %job.id, "stale running job exhausted its attempts");
                    summary.exhausted += 1;
                }
            }
        }
    }

    Ok(summary)
}
