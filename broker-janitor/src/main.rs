use std::time;

use envconfig::Envconfig;
use eyre::Result;
use tracing::error;
use tracing_subscriber::EnvFilter;

use broker_common::db::create_pool;
use broker_common::queue::DispatchQueue;
use broker_common::store::JobStore;
use broker_janitor::config::Config;
use broker_janitor::reaper::promote_stale_running;
use broker_janitor::replay::{replay_pending, ReplaySettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()?;
    let pool = create_pool(
        &config.database_url,
        config.max_pg_connections,
        "broker-janitor",
    )?;

    let store = JobStore::new(pool.clone());
    let queue = DispatchQueue::new(pool);
    let client = reqwest::Client::new();
    let settings = ReplaySettings {
        replay_url: config.replay_url.clone(),
        queue_secret: config.queue_secret.clone(),
        cooldown_seconds: config.replay_cooldown_seconds,
        batch_size: config.replay_batch_size,
    };

    let mut interval = tokio::time::interval(time::Duration::from_secs(config.interval_seconds));

    loop {
        interval.tick().await;

        if let Err(e) = promote_stale_running(
            &store,
            &queue,
            config.reaper_stale_seconds,
            config.reaper_batch_size,
        )
        .await
        {
            error!("reaper sweep failed: {}", e);
        }

        if let Err(e) = replay_pending(&store, &client, &settings).await {
            error!("dead-letter replay sweep failed: {}", e);
        }
    }
}
