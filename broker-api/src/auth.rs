//! Request authentication.
//!
//! Identity management is an external concern; this module only consumes the
//! token→tenant lookup table and the shared worker secret.

use axum::http::HeaderMap;
use sqlx::postgres::PgPool;
use tracing::error;

use crate::api::ApiError;

/// The identity resolved from a bearer token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthContext {
    pub tenant_id: uuid::Uuid,
    pub user_id: Option<uuid::Uuid>,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the caller's tenant from the Authorization header.
pub async fn authenticate(pool: &PgPool, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::NoTokenError)?;

    let context: Option<AuthContext> =
        sqlx::query_as("SELECT tenant_id, user_id FROM tenant_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                error!("failed to resolve tenant token: {}", e);
                ApiError::TokenValidationError
            })?;

    context.ok_or(ApiError::TokenValidationError)
}

/// Constant-time byte comparison. Mismatching lengths return early; only the
/// content comparison needs to resist timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Check the shared worker secret header. Both sides are trimmed before the
/// compare so a trailing newline in a deployed secret does not lock the
/// worker out.
pub fn verify_queue_secret(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let provided = headers
        .get("x-queue-secret")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    if !expected.trim().is_empty()
        && constant_time_eq(provided.trim().as_bytes(), expected.trim().as_bytes())
    {
        Ok(())
    } else {
        Err(ApiError::SecretValidationError)
    }
}
