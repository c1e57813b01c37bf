//! Submission ingress.
//!
//! Order matters: authenticate, validate, consume quota, create the job row,
//! then enqueue. The row is created before the queue message so a worker can
//! never lease a message whose job is missing. A failure at any step aborts
//! the request with the matching error; nothing earlier needs unwinding
//! because quota is the only consumable and is deliberately spent before the
//! row exists.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use broker_common::job::{ApiMethod, NewJob, ProviderKind};

use super::app::AppState;
use crate::api::{ApiError, JobStatusResponse, QueryResponse, RateLimitBody};
use crate::auth::authenticate;

const MAX_PROMPT_CHARS: usize = 100_000;
const MAX_FEATURE_SLUG_CHARS: usize = 100;
const DEFAULT_PROVIDER_SLUG: &str = "sync-a";

#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub provider_slug: Option<String>,
    pub feature_slug: Option<String>,
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub background: bool,
}

impl QueryRequest {
    fn from_bytes(bytes: &Bytes) -> Result<Self, ApiError> {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::debug!("failed to decode submission body: {}", e);
            ApiError::RequestDecodingError("body is not a valid submission".to_owned())
        })
    }

    fn validate(&self) -> Result<(), ApiError> {
        let prompt_chars = self.prompt.chars().count();
        if prompt_chars == 0 {
            return Err(ApiError::ValidationError("prompt must not be empty".to_owned()));
        }
        if prompt_chars > MAX_PROMPT_CHARS {
            return Err(ApiError::ValidationError(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }

        if let Some(feature_slug) = &self.feature_slug {
            let valid = !feature_slug.is_empty()
                && feature_slug.chars().count() <= MAX_FEATURE_SLUG_CHARS
                && feature_slug
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(ApiError::ValidationError(
                    "feature slug must match [A-Za-z0-9_-]+ and be at most 100 characters"
                        .to_owned(),
                ));
            }
        }

        Ok(())
    }
}

#[instrument(skip_all, fields(tenant_id, provider_slug, background))]
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<QueryResponse>), ApiError> {
    let auth = authenticate(state.store.pool(), &headers).await?;
    let tenant_id = auth.tenant_id.to_string();
    tracing::Span::current().record("tenant_id", tenant_id.as_str());

    let request = QueryRequest::from_bytes(&body)?;
    request.validate()?;

    let provider_slug = request
        .provider_slug
        .clone()
        .unwrap_or_else(|| DEFAULT_PROVIDER_SLUG.to_owned());
    tracing::Span::current().record("provider_slug", provider_slug.as_str());
    tracing::Span::current().record("background", request.background);

    let provider = state
        .store
        .get_provider(&provider_slug)
        .await?
        .filter(|provider| provider.active)
        .ok_or_else(|| ApiError::UnknownProviderError(provider_slug.clone()))?;

    if request.background && !provider.supports_background() {
        return Err(ApiError::BackgroundNotSupportedError(provider_slug));
    }

    let rate_limit = state
        .limiter
        .increment(auth.tenant_id, Utc::now(), state.default_quota)
        .await?
        .ok_or(ApiError::RateLimitExceededError)?;

    // Typed fields are lifted out of the free-form bag; the gateway strips
    // them from the passthrough again, so they cannot override routing.
    let model = request
        .input
        .get("model")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| provider.default_model().map(str::to_owned));
    let messages = request.input.get("messages").cloned();
    let api_method = match provider.kind {
        ProviderKind::Async => ApiMethod::Responses,
        ProviderKind::Sync => ApiMethod::Chat,
    };

    let job = state
        .store
        .create_job(NewJob {
            tenant_id: auth.tenant_id,
            user_id: auth.user_id,
            provider_slug: provider.slug.clone(),
            feature_slug: request.feature_slug.clone(),
            prompt: request.prompt.clone(),
            system_prompt: request.system_prompt.clone(),
            messages,
            input: request.input,
            api_method,
            model,
            context: request.context,
        })
        .await?;

    state.queue.enqueue(job.id).await?;
    metrics::counter!("llm_submissions_accepted").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(QueryResponse {
            job_id: job.id,
            status: job.status,
            rate_limit: RateLimitBody::from(rate_limit),
        }),
    ))
}

#[instrument(skip_all, fields(job_id))]
pub async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let auth = authenticate(state.store.pool(), &headers).await?;
    let job_id_field = job_id.to_string();
    tracing::Span::current().record("job_id", job_id_field.as_str());

    let job = state
        .store
        .get_job(job_id)
        .await?
        // A job in another tenant reads as absent, not forbidden.
        .filter(|job| job.tenant_id == auth.tenant_id)
        .ok_or(ApiError::JobNotFoundError)?;

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        result: job.result.map(|r| r.0),
        error_message: job.error_message,
        created_at: job.created_at,
        completed_at: job.completed_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, Router};
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::PgPool;
    use tower::ServiceExt;

    use crate::handlers::app::add_routes;
    use crate::handlers::test_util::{seed_tenant, test_state};

    async fn post_query(app: Router, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/llm-query")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }

        let response = app
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_submission_creates_job_and_message(db: PgPool) {
        seed_tenant(&db, "tok_1").await;
        let app = add_routes(Router::new(), test_state(&db), "");

        let (status, body) = post_query(
            app,
            Some("tok_1"),
            json!({"prompt": "Hello", "provider_slug": "sync-a"}),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["rate_limit"]["used"], 1);
        assert_eq!(body["rate_limit"]["quota"], 1000);
        assert_eq!(body["rate_limit"]["remaining"], 999);

        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
        let (prompt, model): (String, Option<String>) =
            sqlx::query_as("SELECT prompt, model FROM jobs WHERE id = $1")
                .bind(job_id)
                .fetch_one(&db)
                .await
                .expect("job row should exist");
        assert_eq!(prompt, "Hello");
        // Model falls back to the catalog default.
        assert_eq!(model.as_deref(), Some("chat-large-1"));

        let (queued,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dispatch_queue")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(queued, 1);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_prompt_length_boundaries(db: PgPool) {
        seed_tenant(&db, "tok_1").await;
        let state = test_state(&db);

        // Length 1 and the exact cap are accepted.
        for prompt in ["a".to_owned(), "a".repeat(100_000)] {
            let app = add_routes(Router::new(), state.clone(), "");
            let (status, _) = post_query(app, Some("tok_1"), json!({"prompt": prompt})).await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }

        // One character over the cap, and empty, are rejected.
        for prompt in ["a".repeat(100_001), String::new()] {
            let app = add_routes(Router::new(), state.clone(), "");
            let (status, body) = post_query(app, Some("tok_1"), json!({"prompt": prompt})).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], "INVALID_REQUEST");
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_feature_slug_validation(db: PgPool) {
        seed_tenant(&db, "tok_1").await;
        let state = test_state(&db);

        let app = add_routes(Router::new(), state.clone(), "");
        let (status, _) = post_query(
            app,
            Some("tok_1"),
            json!({"prompt": "p", "feature_slug": "extract-colors_2"}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let too_long = "x".repeat(101);
        for bad in ["has space", "semi;colon", too_long.as_str()] {
            let app = add_routes(Router::new(), state.clone(), "");
            let (status, _) = post_query(
                app,
                Some("tok_1"),
                json!({"prompt": "p", "feature_slug": bad}),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad} should be rejected");
        }
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_background_requires_async_provider(db: PgPool) {
        seed_tenant(&db, "tok_1").await;
        let state = test_state(&db);

        let app = add_routes(Router::new(), state.clone(), "");
        let (status, body) = post_query(
            app,
            Some("tok_1"),
            json!({"prompt": "p", "provider_slug": "sync-a", "background": true}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BACKGROUND_NOT_SUPPORTED");

        let app = add_routes(Router::new(), state, "");
        let (status, body) = post_query(
            app,
            Some("tok_1"),
            json!({"prompt": "p", "provider_slug": "async-c", "background": true}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_unknown_provider_is_rejected(db: PgPool) {
        seed_tenant(&db, "tok_1").await;
        let app = add_routes(Router::new(), test_state(&db), "");

        let (status, body) = post_query(
            app,
            Some("tok_1"),
            json!({"prompt": "p", "provider_slug": "ghost"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "UNKNOWN_PROVIDER");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_quota_boundary(db: PgPool) {
        seed_tenant(&db, "tok_1").await;
        let mut state = test_state(&db);
        state.default_quota = 2;

        for expected_used in 1..=2 {
            let app = add_routes(Router::new(), state.clone(), "");
            let (status, body) = post_query(app, Some("tok_1"), json!({"prompt": "p"})).await;
            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(body["rate_limit"]["used"], expected_used);
        }

        let app = add_routes(Router::new(), state, "");
        let (status, body) = post_query(app, Some("tok_1"), json!({"prompt": "p"})).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_authentication_is_required(db: PgPool) {
        let state = test_state(&db);

        let app = add_routes(Router::new(), state.clone(), "");
        let (status, _) = post_query(app, None, json!({"prompt": "p"})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let app = add_routes(Router::new(), state, "");
        let (status, _) = post_query(app, Some("tok_bogus"), json!({"prompt": "p"})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_status_read_is_tenant_scoped(db: PgPool) {
        seed_tenant(&db, "tok_owner").await;
        seed_tenant(&db, "tok_other").await;
        let state = test_state(&db);

        let app = add_routes(Router::new(), state.clone(), "");
        let (_, body) = post_query(app, Some("tok_owner"), json!({"prompt": "p"})).await;
        let job_id = body["job_id"].as_str().unwrap().to_owned();

        let get_status = |token: &'static str| {
            let state = state.clone();
            let job_id = job_id.clone();
            async move {
                let app = add_routes(Router::new(), state, "");
                let response = app
                    .oneshot(
                        Request::builder()
                            .uri(format!("/llm-query/{job_id}"))
                            .header("authorization", format!("Bearer {token}"))
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();
                let status = response.status();
                let bytes = response.into_body().collect().await.unwrap().to_bytes();
                (status, serde_json::from_slice::<Value>(&bytes).unwrap())
            }
        };

        let (status, body) = get_status("tok_owner").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");

        let (status, _) = get_status("tok_other").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
