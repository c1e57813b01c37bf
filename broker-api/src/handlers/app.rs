use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::{routing, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};

use broker_common::notify::Notifier;
use broker_common::processors::ProcessorRegistry;
use broker_common::queue::DispatchQueue;
use broker_common::ratelimit::RateLimiter;
use broker_common::store::JobStore;
use broker_gateway::client::ProviderRegistry;

use super::{query, webhook, worker};

/// Shared handler state. Constructed once at startup; tests substitute
/// fields (fake provider clients, a no-op notifier) instead of touching
/// globals.
#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub queue: DispatchQueue,
    pub limiter: RateLimiter,
    pub providers: ProviderRegistry,
    pub processors: ProcessorRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub queue_secret: String,
    pub default_quota: i32,
}

pub fn add_routes(router: Router<AppState>, state: AppState, allowed_origins: &str) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop, just check axum health
        .route("/llm-query", routing::post(query::submit))
        .route("/llm-query/:job_id", routing::get(query::status))
        .route("/llm-worker", routing::post(worker::drain))
        .route("/llm-webhook", routing::post(webhook::receive))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

pub async fn index() -> &'static str {
    "llm broker api"
}

/// Allow-list CORS from the env-configured comma-separated origins. The
/// OPTIONS preflight is answered by the layer.
fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::list(origins))
}
