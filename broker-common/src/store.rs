//! # JobStore
//!
//! Transactional persistence for job records. Every state-mutating query is
//! an atomic conditional update keyed on `(id, status = expected)`; a zero-row
//! result means the job was cancelled or raced by another actor, and the
//! caller takes the skipped path. The store also owns the webhook record
//! table, the append-only diagnostic log, and the dead-letter table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use tracing::error;
use uuid::Uuid;

use crate::diagnostics::DiagnosticEvent;
use crate::error::DatabaseError;
use crate::job::{Job, JobStatus, NewJob, ProviderConfig};
use crate::queue::DispatchQueue;

/// A dead-letter entry holding a callback payload whose processing raised.
/// The payload is stored verbatim: it is needed for replay.
#[derive(Debug, sqlx::FromRow)]
pub struct DlqEntry {
    pub dlq_id: i64,
    pub job_id: Option<Uuid>,
    pub provider_slug: String,
    pub error_code: Option<String>,
    pub error_message: String,
    pub webhook_payload: Json<Value>,
    pub state: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Post-processors receive the pool to perform their domain writes.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new job in state `queued`. Creation happens in a single
    /// statement so a failed ingress never leaves a half-created row.
    /// Ownership of `NewJob` is taken to enforce a submission is only
    /// created once.
    pub async fn create_job(&self, new: NewJob) -> Result<Job, DatabaseError> {
        let base_query = r#"
INSERT INTO jobs
    (id, tenant_id, user_id, provider_slug, feature_slug, prompt, system_prompt,
     messages, input, api_method, model, context)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
RETURNING
    jobs.*
        "#;

        let job = sqlx::query_as(base_query)
            .bind(Uuid::now_v7())
            .bind(new.tenant_id)
            .bind(new.user_id)
            .bind(&new.provider_slug)
            .bind(&new.feature_slug)
            .bind(&new.prompt)
            .bind(&new.system_prompt)
            .bind(new.messages.map(Json))
            .bind(Json(new.input))
            .bind(new.api_method)
            .bind(&new.model)
            .bind(Json(new.context))
            .fetch_one(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("INSERT", error))?;

        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("SELECT", error))
    }

    /// The current status only. Used for the pre-processor status check, so
    /// a job cancelled mid-flight never reaches a domain write.
    pub async fn get_job_status(&self, id: Uuid) -> Result<Option<JobStatus>, DatabaseError> {
        let status: Option<(JobStatus,)> = sqlx::query_as("SELECT status FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("SELECT", error))?;

        Ok(status.map(|(status,)| status))
    }

    /// Look a job up by the response id assigned by the async provider.
    pub async fn find_job_by_response_id(
        &self,
        response_id: &str,
    ) -> Result<Option<Job>, DatabaseError> {
        sqlx::query_as(
            "SELECT * FROM jobs WHERE llm_response_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(response_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| DatabaseError::query("SELECT", error))
    }

    /// Atomically claim a job for execution, binding it to the calling
    /// worker. Returns the full row, or `None` if the job was not claimable
    /// (already running, terminal, or cancelled).
    pub async fn claim_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let base_query = r#"
UPDATE
    jobs
SET
    status = 'running',
    started_at = NOW()
WHERE
    id = $1
    AND status IN ('queued', 'retrying')
RETURNING
    jobs.*
        "#;

        sqlx::query_as(base_query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))
    }

    /// running -> waiting_llm, recording the provider-assigned response id.
    pub async fn mark_waiting_llm(
        &self,
        id: Uuid,
        response_id: &str,
    ) -> Result<bool, DatabaseError> {
        let base_query = r#"
UPDATE
    jobs
SET
    status = 'waiting_llm',
    llm_response_id = $2
WHERE
    id = $1
    AND status = 'running'
        "#;

        let result = sqlx::query(base_query)
            .bind(id)
            .bind(response_id)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Guarded transition to `completed`, storing the result.
    pub async fn complete_job(
        &self,
        id: Uuid,
        expected: JobStatus,
        result: &Value,
    ) -> Result<bool, DatabaseError> {
        let base_query = r#"
UPDATE
    jobs
SET
    status = 'completed',
    completed_at = NOW(),
    result = $3,
    error_message = NULL
WHERE
    id = $1
    AND status = $2
        "#;

        let updated = sqlx::query(base_query)
            .bind(id)
            .bind(expected)
            .bind(Json(result))
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(updated.rows_affected() > 0)
    }

    /// Guarded transition to `retrying`, consuming one attempt.
    pub async fn retry_job(
        &self,
        id: Uuid,
        expected: JobStatus,
        error_message: &str,
    ) -> Result<bool, DatabaseError> {
        let base_query = r#"
UPDATE
    jobs
SET
    status = 'retrying',
    retry_count = retry_count + 1,
    error_message = $3
WHERE
    id = $1
    AND status = $2
        "#;

        let result = sqlx::query(base_query)
            .bind(id)
            .bind(expected)
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Guarded terminal transition to `exhausted`.
    pub async fn exhaust_job(
        &self,
        id: Uuid,
        expected: JobStatus,
        error_message: &str,
    ) -> Result<bool, DatabaseError> {
        let base_query = r#"
UPDATE
    jobs
SET
    status = 'exhausted',
    completed_at = NOW(),
    error_message = $3
WHERE
    id = $1
    AND status = $2
        "#;

        let result = sqlx::query(base_query)
            .bind(id)
            .bind(expected)
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Guarded terminal transition to `post_processing_failed`. The raw model
    /// output is preserved in `result`: those tokens were already paid for,
    /// and the domain write is what failed.
    pub async fn fail_post_processing(
        &self,
        id: Uuid,
        expected: JobStatus,
        raw_output: &Value,
        error_message: &str,
    ) -> Result<bool, DatabaseError> {
        let base_query = r#"
UPDATE
    jobs
SET
    status = 'post_processing_failed',
    completed_at = NOW(),
    result = $3,
    error_message = $4
WHERE
    id = $1
    AND status = $2
        "#;

        let result = sqlx::query(base_query)
            .bind(id)
            .bind(expected)
            .bind(Json(raw_output))
            .bind(error_message)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel a job from any non-terminal state. Running workers discover
    /// the cancellation at their next guarded update.
    pub async fn cancel_job(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let base_query = r#"
UPDATE
    jobs
SET
    status = 'cancelled',
    completed_at = NOW()
WHERE
    id = $1
    AND status NOT IN ('completed', 'exhausted', 'post_processing_failed', 'cancelled')
        "#;

        let result = sqlx::query(base_query)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Retry initiated by the callback receiver. Unlike the worker's retry,
    /// the original queue message was already deleted after submission, so a
    /// fresh message is enqueued once the guarded transition holds.
    pub async fn retry_from_webhook(
        &self,
        queue: &DispatchQueue,
        id: Uuid,
        error_message: &str,
    ) -> Result<bool, DatabaseError> {
        if !self
            .retry_job(id, JobStatus::WaitingLlm, error_message)
            .await?
        {
            return Ok(false);
        }

        queue.enqueue(id).await?;
        Ok(true)
    }

    pub async fn get_provider(
        &self,
        slug: &str,
    ) -> Result<Option<ProviderConfig>, DatabaseError> {
        sqlx::query_as("SELECT * FROM providers WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("SELECT", error))
    }

    /// Record a webhook delivery. Uniqueness on `(provider_slug, webhook_id)`
    /// makes duplicate deliveries cheap no-ops: `false` means this exact
    /// callback was seen before.
    pub async fn record_webhook(
        &self,
        provider_slug: &str,
        webhook_id: &str,
        job_id: Option<Uuid>,
        event_type: &str,
    ) -> Result<bool, DatabaseError> {
        let base_query = r#"
INSERT INTO webhook_records (webhook_id, job_id, provider_slug, event_type)
VALUES ($1, $2, $3, $4)
ON CONFLICT (provider_slug, webhook_id) DO NOTHING
        "#;

        let result = sqlx::query(base_query)
            .bind(webhook_id)
            .bind(job_id)
            .bind(provider_slug)
            .bind(event_type)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("INSERT", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Append a diagnostic record. Failure to log never fails the outer
    /// operation; the error is traced and dropped.
    pub async fn log_event(&self, event: DiagnosticEvent) {
        let base_query = r#"
INSERT INTO diagnostic_log
    (event_type, job_id, provider_slug, tenant_id, error_code, error_message,
     job_status_at_receipt, expected_response_id, received_response_id, response_payload)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#;

        let inserted = sqlx::query(base_query)
            .bind(event.event_type)
            .bind(event.job_id)
            .bind(&event.provider_slug)
            .bind(event.tenant_id)
            .bind(&event.error_code)
            .bind(&event.error_message)
            .bind(event.job_status_at_receipt.map(|s| s.as_str()))
            .bind(&event.expected_response_id)
            .bind(&event.received_response_id)
            .bind(event.response_payload.map(Json))
            .execute(&self.pool)
            .await;

        if let Err(e) = inserted {
            error!(
                event_type = event.event_type,
                "failed to append diagnostic log entry: {}", e
            );
        }
    }

    /// File a callback payload into the dead-letter table for later replay.
    pub async fn add_dlq_entry(
        &self,
        job_id: Option<Uuid>,
        provider_slug: &str,
        error_code: Option<&str>,
        error_message: &str,
        webhook_payload: &Value,
    ) -> Result<i64, DatabaseError> {
        let base_query = r#"
INSERT INTO dlq (job_id, provider_slug, error_code, error_message, webhook_payload)
VALUES ($1, $2, $3, $4, $5)
RETURNING dlq_id
        "#;

        let (dlq_id,): (i64,) = sqlx::query_as(base_query)
            .bind(job_id)
            .bind(provider_slug)
            .bind(error_code)
            .bind(error_message)
            .bind(Json(webhook_payload))
            .fetch_one(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("INSERT", error))?;

        Ok(dlq_id)
    }

    pub async fn resolve_dlq_entry(&self, dlq_id: i64) -> Result<bool, DatabaseError> {
        let result =
            sqlx::query("UPDATE dlq SET state = 'resolved' WHERE dlq_id = $1 AND state = 'pending'")
                .bind(dlq_id)
                .execute(&self.pool)
                .await
                .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Pending entries older than `cooldown_seconds`, oldest first. The
    /// cooldown keeps the replay driver from racing a callback that is still
    /// being processed.
    pub async fn pending_dlq_entries(
        &self,
        cooldown_seconds: i64,
        limit: i64,
    ) -> Result<Vec<DlqEntry>, DatabaseError> {
        let base_query = r#"
SELECT
    *
FROM
    dlq
WHERE
    state = 'pending'
    AND created_at <= NOW() - ($1 * INTERVAL '1 second')
ORDER BY
    created_at
LIMIT $2
        "#;

        sqlx::query_as(base_query)
            .bind(cooldown_seconds)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("SELECT", error))
    }

    /// Jobs stuck in `running` longer than `stale_seconds`. The reaper
    /// promotes these so the redelivered queue message can re-claim them.
    pub async fn stale_running_jobs(
        &self,
        stale_seconds: i64,
        limit: i64,
    ) -> Result<Vec<Job>, DatabaseError> {
        let base_query = r#"
SELECT
    *
FROM
    jobs
WHERE
    status = 'running'
    AND started_at <= NOW() - ($1 * INTERVAL '1 second')
ORDER BY
    started_at
LIMIT $2
        "#;

        sqlx::query_as(base_query)
            .bind(stale_seconds)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("SELECT", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ApiMethod;
    use serde_json::{json, Map};

    fn new_job(provider_slug: &str) -> NewJob {
        NewJob {
            tenant_id: Uuid::now_v7(),
            user_id: None,
            provider_slug: provider_slug.to_owned(),
            feature_slug: None,
            prompt: "say hello".to_owned(),
            system_prompt: None,
            messages: None,
            input: Map::new(),
            api_method: ApiMethod::Chat,
            model: Some("chat-large-1".to_owned()),
            context: Map::new(),
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_create_and_claim_job(db: PgPool) {
        let store = JobStore::new(db);

        let job = store
            .create_job(new_job("sync-a"))
            .await
            .expect("failed to create job");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retry_count, 0);
        assert!(job.started_at.is_none());

        let claimed = store
            .claim_job(job.id)
            .await
            .expect("failed to claim")
            .expect("job should be claimable");
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());

        // A second claim loses the race.
        let reclaimed = store.claim_job(job.id).await.expect("failed to claim");
        assert!(reclaimed.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_claim_succeeds_from_retrying(db: PgPool) {
        let store = JobStore::new(db);
        let job = store
            .create_job(new_job("sync-a"))
            .await
            .expect("failed to create job");

        store.claim_job(job.id).await.expect("claim").unwrap();
        assert!(store
            .retry_job(job.id, JobStatus::Running, "upstream unavailable")
            .await
            .expect("retry"));

        let reclaimed = store
            .claim_job(job.id)
            .await
            .expect("claim")
            .expect("retrying jobs are claimable");
        assert_eq!(reclaimed.status, JobStatus::Running);
        assert_eq!(reclaimed.retry_count, 1);
        assert_eq!(
            reclaimed.error_message.as_deref(),
            Some("upstream unavailable")
        );
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_guarded_complete_skips_cancelled_job(db: PgPool) {
        let store = JobStore::new(db);
        let job = store
            .create_job(new_job("sync-a"))
            .await
            .expect("failed to create job");

        store.claim_job(job.id).await.expect("claim").unwrap();

        // External actor cancels while the provider call is in flight.
        assert!(store.cancel_job(job.id).await.expect("cancel"));

        // The worker's completion update must not apply.
        let applied = store
            .complete_job(job.id, JobStatus::Running, &json!({"output": "Hi"}))
            .await
            .expect("complete");
        assert!(!applied);

        let current = store.get_job(job.id).await.expect("get").unwrap();
        assert_eq!(current.status, JobStatus::Cancelled);
        assert!(current.result.is_none());
        assert!(current.completed_at.is_some());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_terminal_transitions_set_completed_at(db: PgPool) {
        let store = JobStore::new(db);

        let completed = store.create_job(new_job("sync-a")).await.expect("create");
        store.claim_job(completed.id).await.expect("claim").unwrap();
        assert!(store
            .complete_job(completed.id, JobStatus::Running, &json!({"output": "Hi"}))
            .await
            .expect("complete"));

        let exhausted = store.create_job(new_job("sync-a")).await.expect("create");
        store.claim_job(exhausted.id).await.expect("claim").unwrap();
        assert!(store
            .exhaust_job(exhausted.id, JobStatus::Running, "too many failures")
            .await
            .expect("exhaust"));

        let failed = store.create_job(new_job("sync-a")).await.expect("create");
        store.claim_job(failed.id).await.expect("claim").unwrap();
        assert!(store
            .fail_post_processing(
                failed.id,
                JobStatus::Running,
                &json!({"output": "raw text"}),
                "bad JSON",
            )
            .await
            .expect("fail post processing"));

        for id in [completed.id, exhausted.id, failed.id] {
            let job = store.get_job(id).await.expect("get").unwrap();
            assert!(job.status.is_terminal());
            assert!(job.completed_at.is_some());
        }

        // Raw output is preserved on post-processing failure.
        let job = store.get_job(failed.id).await.expect("get").unwrap();
        assert_eq!(job.result.unwrap().0, json!({"output": "raw text"}));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_waiting_llm_flow(db: PgPool) {
        let store = JobStore::new(db);
        let job = store.create_job(new_job("async-c")).await.expect("create");

        store.claim_job(job.id).await.expect("claim").unwrap();
        assert!(store
            .mark_waiting_llm(job.id, "resp_1")
            .await
            .expect("mark waiting"));

        let current = store.get_job(job.id).await.expect("get").unwrap();
        assert_eq!(current.status, JobStatus::WaitingLlm);
        assert_eq!(current.llm_response_id.as_deref(), Some("resp_1"));

        let found = store
            .find_job_by_response_id("resp_1")
            .await
            .expect("find")
            .expect("job should be findable by response id");
        assert_eq!(found.id, job.id);

        assert!(store
            .complete_job(job.id, JobStatus::WaitingLlm, &json!({"output": "done"}))
            .await
            .expect("complete"));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_retry_from_webhook_enqueues_new_message(db: PgPool) {
        let store = JobStore::new(db.clone());
        let queue = DispatchQueue::new(db);

        let job = store.create_job(new_job("async-c")).await.expect("create");
        store.claim_job(job.id).await.expect("claim").unwrap();
        store
            .mark_waiting_llm(job.id, "resp_1")
            .await
            .expect("mark waiting");

        assert!(store
            .retry_from_webhook(&queue, job.id, "provider reported failure")
            .await
            .expect("retry from webhook"));

        let current = store.get_job(job.id).await.expect("get").unwrap();
        assert_eq!(current.status, JobStatus::Retrying);
        assert_eq!(current.retry_count, 1);
        // The response id of the failed attempt is kept for diagnostics.
        assert_eq!(current.llm_response_id.as_deref(), Some("resp_1"));

        let messages = queue.read(30, 10).await.expect("read");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].job_id(), Some(job.id));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_retry_from_webhook_skips_cancelled_job(db: PgPool) {
        let store = JobStore::new(db.clone());
        let queue = DispatchQueue::new(db);

        let job = store.create_job(new_job("async-c")).await.expect("create");
        store.claim_job(job.id).await.expect("claim").unwrap();
        store
            .mark_waiting_llm(job.id, "resp_1")
            .await
            .expect("mark waiting");
        store.cancel_job(job.id).await.expect("cancel");

        assert!(!store
            .retry_from_webhook(&queue, job.id, "provider reported failure")
            .await
            .expect("retry from webhook"));

        // No message was enqueued for the cancelled job.
        let messages = queue.read(30, 10).await.expect("read");
        assert!(messages.is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_record_webhook_is_idempotent(db: PgPool) {
        let store = JobStore::new(db);
        let job_id = Uuid::now_v7();

        let first = store
            .record_webhook("async-c", "wh_1", Some(job_id), "response.completed")
            .await
            .expect("record webhook");
        let duplicate = store
            .record_webhook("async-c", "wh_1", Some(job_id), "response.completed")
            .await
            .expect("record webhook");

        assert!(first);
        assert!(!duplicate);

        // The same webhook id under another provider is a distinct delivery.
        let other_provider = store
            .record_webhook("sync-a", "wh_1", Some(job_id), "response.completed")
            .await
            .expect("record webhook");
        assert!(other_provider);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_dlq_lifecycle(db: PgPool) {
        let store = JobStore::new(db);
        let job_id = Uuid::now_v7();
        let payload = json!({"id": "evt_1", "data": {"id": "resp_1"}});

        let dlq_id = store
            .add_dlq_entry(
                Some(job_id),
                "async-c",
                Some("TIMEOUT"),
                "retrieve timed out",
                &payload,
            )
            .await
            .expect("add dlq entry");

        // Entries younger than the cooldown are not eligible yet.
        let pending = store.pending_dlq_entries(3600, 10).await.expect("pending");
        assert!(pending.is_empty());

        let pending = store.pending_dlq_entries(0, 10).await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].dlq_id, dlq_id);
        assert_eq!(pending[0].webhook_payload.0, payload);

        assert!(store.resolve_dlq_entry(dlq_id).await.expect("resolve"));
        // Resolving again is a no-op.
        assert!(!store.resolve_dlq_entry(dlq_id).await.expect("resolve"));

        let pending = store.pending_dlq_entries(0, 10).await.expect("pending");
        assert!(pending.is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_stale_running_jobs(db: PgPool) {
        let store = JobStore::new(db.clone());
        let job = store.create_job(new_job("sync-a")).await.expect("create");
        store.claim_job(job.id).await.expect("claim").unwrap();

        // Freshly started jobs are not stale.
        let stale = store.stale_running_jobs(300, 10).await.expect("stale");
        assert!(stale.is_empty());

        sqlx::query("UPDATE jobs SET started_at = NOW() - INTERVAL '10 minutes' WHERE id = $1")
            .bind(job.id)
            .execute(&db)
            .await
            .expect("backdate");

        let stale = store.stale_running_jobs(300, 10).await.expect("stale");
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, job.id);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_provider_catalog_is_seeded(db: PgPool) {
        let store = JobStore::new(db);

        let provider = store
            .get_provider("async-c")
            .await
            .expect("get provider")
            .expect("async-c should be seeded");
        assert!(provider.supports_background());
        assert!(provider.active);
        assert_eq!(provider.timeout_seconds, 120);

        let sync = store
            .get_provider("sync-a")
            .await
            .expect("get provider")
            .expect("sync-a should be seeded");
        assert!(!sync.supports_background());
        assert_eq!(sync.default_model(), Some("chat-large-1"));

        assert!(store
            .get_provider("unknown")
            .await
            .expect("get provider")
            .is_none());
    }
}
