//! The uniform call surface over provider backends.
//!
//! Each backend implements [`ProviderClient`]; a process-wide
//! [`ProviderRegistry`] built at startup maps catalog slugs to clients.
//! Tests construct registries with fakes instead of mutating globals.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use http::HeaderMap;
use reqwest::header;
use uuid::Uuid;

use broker_common::job::ProviderConfig;

use crate::error::{ErrorCode, LlmError};
use crate::types::{LlmRequest, LlmResult};

/// Default deadline when the catalog row carries none.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// One provider backend.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn slug(&self) -> &str;

    /// Execute a request inline and return the normalized result.
    async fn execute(
        &self,
        request: &LlmRequest,
        provider: &ProviderConfig,
    ) -> Result<LlmResult, LlmError>;

    /// Submit a request in background mode, annotated with the job id, and
    /// return the provider-assigned response id without waiting. The result
    /// is delivered later through the callback receiver.
    async fn submit_background(
        &self,
        _request: &LlmRequest,
        _provider: &ProviderConfig,
        _job_id: Uuid,
    ) -> Result<String, LlmError> {
        Err(LlmError::new(
            self.slug(),
            ErrorCode::BackgroundNotSupported,
            "provider does not support background submissions",
        ))
    }

    /// Retrieve a full response body by id. Only meaningful for backends
    /// whose callbacks carry just the response id.
    async fn fetch_response(
        &self,
        _provider: &ProviderConfig,
        _response_id: &str,
    ) -> Result<LlmResult, LlmError> {
        Err(LlmError::new(
            self.slug(),
            ErrorCode::InvalidRequest,
            "provider does not support response retrieval",
        ))
    }

    /// Verify an inbound callback's authenticity. Backends without callbacks
    /// reject everything.
    fn verify_callback(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<(), LlmError> {
        Err(LlmError::new(
            self.slug(),
            ErrorCode::WebhookVerificationFailed,
            "provider does not deliver callbacks",
        ))
    }
}

/// Race a provider call against the catalog deadline. On deadline the caller
/// gets `TIMEOUT` immediately; the underlying call may still run to
/// completion but its result is discarded.
pub async fn with_deadline<T, F>(
    provider_slug: &str,
    timeout: time::Duration,
    call: F,
) -> Result<T, LlmError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    let timeout = if timeout.is_zero() {
        time::Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)
    } else {
        timeout
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::timeout(provider_slug, timeout.as_secs())),
    }
}

/// Credentials and endpoint override for one backend.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
}

/// An explicitly-constructed, process-wide map of provider clients.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.slug().to_owned(), client);
    }

    pub fn get(&self, slug: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(slug).cloned()
    }
}

/// Build the HTTP client shared by the provider backends.
pub fn build_http_client(request_timeout: time::Duration) -> Result<reqwest::Client, LlmError> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("llm-broker gateway")
        .timeout(request_timeout)
        .build()
        .map_err(|e| {
            LlmError::new(
                "gateway",
                ErrorCode::Unknown,
                "failed to construct http client",
            )
            .with_cause(e)
        })
}
