//! On-demand worker trigger.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::instrument;

use broker_worker::error::WorkerError;
use broker_worker::worker::{drain_queue, DrainSummary, WorkerContext};

use super::app::AppState;
use crate::api::ApiError;
use crate::auth::verify_queue_secret;

#[instrument(skip_all)]
pub async fn drain(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DrainSummary>, ApiError> {
    verify_queue_secret(&headers, &state.queue_secret)?;

    let ctx = WorkerContext {
        store: state.store.clone(),
        queue: state.queue.clone(),
        providers: state.providers.clone(),
        processors: state.processors.clone(),
        notifier: state.notifier.clone(),
    };

    let summary = drain_queue(&ctx).await.map_err(|e| match e {
        WorkerError::DatabaseError(error) => ApiError::DatabaseError(error),
    })?;

    Ok(Json(summary))
}
