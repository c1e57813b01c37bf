//! Shared fixtures for handler tests.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use broker_common::notify::NoopNotifier;
use broker_common::processors::ProcessorRegistry;
use broker_common::queue::DispatchQueue;
use broker_common::ratelimit::RateLimiter;
use broker_common::store::JobStore;
use broker_gateway::client::ProviderRegistry;

use super::app::AppState;

pub(crate) const TEST_QUEUE_SECRET: &str = "test-queue-secret";

pub(crate) fn test_state(db: &PgPool) -> AppState {
    AppState {
        store: JobStore::new(db.clone()),
        queue: DispatchQueue::new(db.clone()),
        limiter: RateLimiter::new(db.clone()),
        providers: ProviderRegistry::new(),
        processors: ProcessorRegistry::new(),
        notifier: Arc::new(NoopNotifier),
        queue_secret: TEST_QUEUE_SECRET.to_owned(),
        default_quota: 1000,
    }
}

/// Insert a tenant token and return the tenant id.
pub(crate) async fn seed_tenant(db: &PgPool, token: &str) -> Uuid {
    let tenant_id = Uuid::now_v7();
    sqlx::query("INSERT INTO tenant_tokens (token, tenant_id) VALUES ($1, $2)")
        .bind(token)
        .bind(tenant_id)
        .execute(db)
        .await
        .expect("failed to insert tenant token");
    tenant_id
}
