use std::sync::Arc;
use std::time;

use envconfig::Envconfig;
use eyre::Result;
use tracing_subscriber::EnvFilter;

use broker_common::db::create_pool;
use broker_common::notify::PgNotifier;
use broker_common::processors::ProcessorRegistry;
use broker_common::queue::DispatchQueue;
use broker_common::store::JobStore;
use broker_gateway::client::build_http_client;
use broker_worker::config::Config;
use broker_worker::worker::{self, WorkerContext};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()?;
    let pool = create_pool(
        &config.database_url,
        config.max_pg_connections,
        "broker-worker",
    )?;

    let http = build_http_client(time::Duration::from_secs(config.request_timeout_seconds))?;

    let ctx = WorkerContext {
        store: JobStore::new(pool.clone()),
        queue: DispatchQueue::new(pool.clone()),
        providers: config.providers.registry(http),
        // Feature teams register their post-processors here.
        processors: ProcessorRegistry::new(),
        notifier: Arc::new(PgNotifier::new(pool)),
    };

    worker::run(
        &ctx,
        time::Duration::from_secs(config.poll_interval_seconds),
    )
    .await;

    Ok(())
}
