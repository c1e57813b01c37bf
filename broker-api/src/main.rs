use std::future::ready;
use std::sync::Arc;
use std::time;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use eyre::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use broker_api::config::Config;
use broker_api::handlers::app::{add_routes, AppState};
use broker_common::db::create_pool;
use broker_common::notify::PgNotifier;
use broker_common::processors::ProcessorRegistry;
use broker_common::queue::DispatchQueue;
use broker_common::ratelimit::RateLimiter;
use broker_common::store::JobStore;
use broker_gateway::client::build_http_client;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()?;
    let pool = create_pool(
        &config.database_url,
        config.max_pg_connections,
        "broker-api",
    )?;
    let http = build_http_client(time::Duration::from_secs(config.request_timeout_seconds))?;

    let state = AppState {
        store: JobStore::new(pool.clone()),
        queue: DispatchQueue::new(pool.clone()),
        limiter: RateLimiter::new(pool.clone()),
        providers: config.providers.registry(http),
        // Feature teams register their post-processors here.
        processors: ProcessorRegistry::new(),
        notifier: Arc::new(PgNotifier::new(pool)),
        queue_secret: config.queue_secret.clone(),
        default_quota: config.default_monthly_quota,
    };

    let recorder_handle = PrometheusBuilder::new().install_recorder()?;
    let router = Router::new().route("/metrics", get(move || ready(recorder_handle.render())));
    let router = add_routes(router, state, &config.allowed_origins);

    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address).await?;
    tracing::info!("listening on {}", address);
    axum::serve(listener, router).await?;

    Ok(())
}
