//! Atomic per-tenant monthly quota accounting.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::DatabaseError;

/// The current usage returned by a successful increment.
#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
pub struct RateLimitStatus {
    pub used: i32,
    pub quota: i32,
}

impl RateLimitStatus {
    pub fn remaining(&self) -> i32 {
        (self.quota - self.used).max(0)
    }
}

/// The period key a request at `now` is counted against.
pub fn current_period(now: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

/// The first instant of the month after `now`, when the counter resets.
pub fn period_reset_at(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };

    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first instant of a month is always a valid timestamp")
}

#[derive(Clone)]
pub struct RateLimiter {
    pool: PgPool,
}

impl RateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check-and-increment in one statement. Creates the counter row on first
    /// use in a period. Returns `None` when the tenant is over quota, in
    /// which case nothing was consumed.
    pub async fn increment(
        &self,
        tenant_id: Uuid,
        now: DateTime<Utc>,
        default_quota: i32,
    ) -> Result<Option<RateLimitStatus>, DatabaseError> {
        let base_query = r#"
INSERT INTO rate_counters (tenant_id, period, used, quota, reset_at)
VALUES ($1, $2, 1, $3, $4)
ON CONFLICT (tenant_id, period) DO UPDATE
SET
    used = rate_counters.used + 1
WHERE
    rate_counters.used < rate_counters.quota
RETURNING
    used,
    quota
        "#;

        let status = sqlx::query_as(base_query)
            .bind(tenant_id)
            .bind(current_period(now))
            .bind(default_quota)
            .bind(period_reset_at(now))
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| DatabaseError::query("INSERT", error))?;

        Ok(status)
    }
}
