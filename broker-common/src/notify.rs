//! User-visible job notifications, delivered fire-and-forget.
//!
//! A failed notification must never affect job status: callers go through
//! [`notify_best_effort`], which traces delivery errors and drops them.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::job::Job;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification insert failed with: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Started,
    Completed,
    Exhausted,
    PostProcessingFailed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Started => "started",
            NotificationKind::Completed => "completed",
            NotificationKind::Exhausted => "exhausted",
            NotificationKind::PostProcessingFailed => "post_processing_failed",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            NotificationKind::Started => "Your request is being processed.",
            NotificationKind::Completed => "Your request has completed.",
            NotificationKind::Exhausted => "Your request failed after repeated attempts.",
            NotificationKind::PostProcessingFailed => {
                "Your request completed, but its results could not be applied."
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobNotification {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub job_id: Uuid,
    pub kind: NotificationKind,
    pub body: String,
}

impl JobNotification {
    pub fn for_job(job: &Job, kind: NotificationKind) -> Self {
        Self {
            tenant_id: job.tenant_id,
            user_id: job.user_id,
            job_id: job.id,
            kind,
            body: kind.body().to_owned(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: JobNotification) -> Result<(), NotifyError>;
}

/// Writes notifications to the notifications table, where the user-facing
/// surface picks them up.
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify(&self, notification: JobNotification) -> Result<(), NotifyError> {
        sqlx::query(
            r#"
INSERT INTO notifications (tenant_id, user_id, job_id, kind, body)
VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(notification.tenant_id)
        .bind(notification.user_id)
        .bind(notification.job_id)
        .bind(notification.kind.as_str())
        .bind(&notification.body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Discards notifications. Used in tests and by deployments without a
/// notification surface.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _notification: JobNotification) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Deliver a notification, tracing and dropping any failure.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: JobNotification) {
    let job_id = notification.job_id;
    let kind = notification.kind.as_str();
    if let Err(e) = notifier.notify(notification).await {
        warn!(%job_id, kind, "failed to deliver notification: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test(migrations = "../migrations")]
    async fn test_pg_notifier_inserts_row(db: PgPool) {
        let notifier = PgNotifier::new(db.clone());
        let notification = JobNotification {
            tenant_id: Uuid::now_v7(),
            user_id: None,
            job_id: Uuid::now_v7(),
            kind: NotificationKind::Completed,
            body: "Your request has completed.".to_owned(),
        };

        notify_best_effort(&notifier, notification.clone()).await;

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE job_id = $1")
                .bind(notification.job_id)
                .fetch_one(&db)
                .await
                .expect("count notifications");
        assert_eq!(count, 1);
    }
}
