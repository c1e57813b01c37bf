//! # DispatchQueue
//!
//! A durable FIFO implemented on top of a PostgreSQL table, with
//! visibility-timeout redelivery and a per-message archive.
//!
//! `read` removes up to `max_count` messages from visibility atomically
//! (skip-locked semantics) for `vt_seconds`. A message that is neither
//! deleted nor archived before the timeout elapses reappears for redelivery;
//! that redelivery is what drives retries of jobs that failed with a
//! retryable error.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::DatabaseError;

/// A message leased from the dispatch queue.
#[derive(Debug, sqlx::FromRow)]
pub struct QueueMessage {
    pub msg_id: i64,
    /// How many times this message has been read. 1 on first delivery.
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    /// The visibility deadline. The message is hidden from other readers
    /// until this instant.
    pub vt: DateTime<Utc>,
    pub payload: Json<Value>,
}

impl QueueMessage {
    /// Extract the job id from the payload, tolerating malformed rows.
    /// The worker archives messages without one.
    pub fn job_id(&self) -> Option<Uuid> {
        self.payload
            .get("job_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// A queue implemented on top of a PostgreSQL table.
#[derive(Clone)]
pub struct DispatchQueue {
    pool: PgPool,
}

impl DispatchQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a message referencing `job_id`, immediately visible.
    pub async fn enqueue(&self, job_id: Uuid) -> Result<i64, DatabaseError> {
        let base_query = r#"
INSERT INTO dispatch_queue (payload)
VALUES ($1)
RETURNING msg_id
        "#;

        let (msg_id,): (i64,) = sqlx::query_as(base_query)
            .bind(Json(json!({ "job_id": job_id })))
            .fetch_one(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("INSERT", error))?;

        Ok(msg_id)
    }

    /// Read up to `max_count` visible messages and hide them for
    /// `vt_seconds`.
    ///
    /// The query that follows uses a FOR UPDATE SKIP LOCKED clause so
    /// concurrent readers never lease the same message. For more details see:
    /// 2ndquadrant.com/en/blog/what-is-select-skip-locked-for-in-postgresql-9-5.
    pub async fn read(
        &self,
        vt_seconds: u32,
        max_count: i64,
    ) -> Result<Vec<QueueMessage>, DatabaseError> {
        let base_query = r#"
WITH visible AS (
    SELECT
        msg_id
    FROM
        dispatch_queue
    WHERE
        vt <= NOW()
    ORDER BY
        msg_id
    LIMIT $1
    FOR UPDATE SKIP LOCKED
)
UPDATE
    dispatch_queue
SET
    vt = NOW() + ($2 * INTERVAL '1 second'),
    read_ct = read_ct + 1
FROM
    visible
WHERE
    dispatch_queue.msg_id = visible.msg_id
RETURNING
    dispatch_queue.msg_id,
    dispatch_queue.read_ct,
    dispatch_queue.enqueued_at,
    dispatch_queue.vt,
    dispatch_queue.payload
        "#;

        let messages = sqlx::query_as(base_query)
            .bind(max_count)
            .bind(vt_seconds as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("UPDATE", error))?;

        Ok(messages)
    }

    /// Remove a message permanently. Called when the worker finished with the
    /// job, successfully or not.
    pub async fn delete(&self, msg_id: i64) -> Result<bool, DatabaseError> {
        let base_query = r#"
DELETE FROM dispatch_queue WHERE msg_id = $1
        "#;

        let result = sqlx::query(base_query)
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("DELETE", error))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a message to the archive table. Called on non-retryable failure
    /// so the message is kept for inspection without being redelivered.
    pub async fn archive(&self, msg_id: i64) -> Result<bool, DatabaseError> {
        let base_query = r#"
WITH removed AS (
    DELETE FROM dispatch_queue WHERE msg_id = $1 RETURNING *
)
INSERT INTO dispatch_archive (msg_id, read_ct, enqueued_at, payload)
SELECT msg_id, read_ct, enqueued_at, payload FROM removed
        "#;

        let result = sqlx::query(base_query)
            .bind(msg_id)
            .execute(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("INSERT", error))?;

        Ok(result.rows_affected() > 0)
    }
}
