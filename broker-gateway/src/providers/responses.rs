//! The responses-API backend (`async-c`).
//!
//! The only asynchronous backend: submissions go out in background mode
//! annotated with the job id, the provider acknowledges with a response id,
//! and the result is delivered later through a signed callback. Callbacks
//! carry only ids, so the receiver retrieves the full body via
//! `fetch_response`.

use async_trait::async_trait;
use http::HeaderMap;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use broker_common::job::ProviderConfig;

use crate::client::{ProviderClient, ProviderCredentials};
use crate::error::{
    classify_http_error, classify_transport_error, code_for_tag, ErrorCode, LlmError,
};
use crate::signature::verify_signature;
use crate::types::{LlmRequest, LlmResult, Usage};

pub const SLUG: &str = "async-c";

pub struct BackgroundResponsesClient {
    client: reqwest::Client,
    api_key: String,
    webhook_secret: Option<String>,
    base_url: String,
}

impl BackgroundResponsesClient {
    pub fn new(client: reqwest::Client, credentials: ProviderCredentials) -> Self {
        Self {
            client,
            api_key: credentials.api_key,
            webhook_secret: credentials.webhook_secret,
            base_url: credentials.base_url,
        }
    }

    fn endpoint(&self, provider: &ProviderConfig, path: &str) -> String {
        let base = provider.base_url().unwrap_or(&self.base_url);
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    async fn post_responses(
        &self,
        provider: &ProviderConfig,
        body: &Value,
    ) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(self.endpoint(provider, "responses"))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(SLUG, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(SLUG, status.as_u16(), &body));
        }

        response.json().await.map_err(|e| {
            LlmError::new(SLUG, ErrorCode::Unknown, "response body was not valid JSON")
                .with_cause(e)
        })
    }
}

fn request_body(request: &LlmRequest) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("model".to_owned(), json!(request.model));
    let input = match &request.messages {
        Some(structured) => structured.clone(),
        None => json!(request.prompt),
    };
    body.insert("input".to_owned(), input);
    if let Some(system) = &request.system_prompt {
        body.insert("instructions".to_owned(), json!(system));
    }
    for (key, value) in request.passthrough() {
        body.insert(key, value);
    }
    body
}

/// Interpret a full response body: completed responses yield output text,
/// failed and incomplete ones a normalized error.
fn parse_response(value: &Value) -> Result<LlmResult, LlmError> {
    match value.get("status").and_then(Value::as_str) {
        Some("completed") | None => extract_output(value),
        Some("failed") => {
            let message = value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("provider reported failure");
            let code = value
                .pointer("/error/code")
                .and_then(Value::as_str)
                .and_then(code_for_tag)
                .unwrap_or(ErrorCode::Unknown);
            Err(LlmError::new(SLUG, code, message))
        }
        Some("incomplete") => {
            let reason = value
                .pointer("/incomplete_details/reason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let code = match reason {
                "max_output_tokens" => ErrorCode::ContextLengthExceeded,
                "content_filter" => ErrorCode::ContentFiltered,
                _ => ErrorCode::Unknown,
            };
            Err(LlmError::new(
                SLUG,
                code,
                format!("response incomplete: {reason}"),
            ))
        }
        Some(other) => Err(LlmError::new(
            SLUG,
            ErrorCode::ProviderUnavailable,
            format!("response not ready (status {other})"),
        )),
    }
}

fn extract_output(value: &Value) -> Result<LlmResult, LlmError> {
    let items = value
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            LlmError::new(SLUG, ErrorCode::Unknown, "response contained no output")
        })?;

    let output: String = items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|segment| segment.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|segment| segment.get("text").and_then(Value::as_str))
        .collect();

    if output.is_empty() {
        return Err(LlmError::new(
            SLUG,
            ErrorCode::Unknown,
            "response contained no output text",
        ));
    }

    let usage: Option<Usage> = value
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok());

    Ok(LlmResult {
        output,
        usage,
        model: value.get("model").and_then(Value::as_str).map(str::to_owned),
        response_id: value.get("id").and_then(Value::as_str).map(str::to_owned),
    })
}

#[async_trait]
impl ProviderClient for BackgroundResponsesClient {
    fn slug(&self) -> &str {
        SLUG
    }

    async fn execute(
        &self,
        request: &LlmRequest,
        provider: &ProviderConfig,
    ) -> Result<LlmResult, LlmError> {
        let value = self
            .post_responses(provider, &Value::Object(request_body(request)))
            .await?;
        parse_response(&value)
    }

    async fn submit_background(
        &self,
        request: &LlmRequest,
        provider: &ProviderConfig,
        job_id: Uuid,
    ) -> Result<String, LlmError> {
        let mut body = request_body(request);
        body.insert("background".to_owned(), json!(true));
        body.insert("metadata".to_owned(), json!({"job_id": job_id}));

        let value = self.post_responses(provider, &Value::Object(body)).await?;

        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                LlmError::new(
                    SLUG,
                    ErrorCode::Unknown,
                    "background submission returned no response id",
                )
            })
    }

    async fn fetch_response(
        &self,
        provider: &ProviderConfig,
        response_id: &str,
    ) -> Result<LlmResult, LlmError> {
        let response = self
            .client
            .get(self.endpoint(provider, &format!("responses/{response_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| classify_transport_error(SLUG, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error(SLUG, status.as_u16(), &body));
        }

        let value: Value = response.json().await.map_err(|e| {
            LlmError::new(SLUG, ErrorCode::Unknown, "response body was not valid JSON")
                .with_cause(e)
        })?;

        parse_response(&value)
    }

    fn verify_callback(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), LlmError> {
        let Some(secret) = &self.webhook_secret else {
            return Err(LlmError::new(
                SLUG,
                ErrorCode::WebhookVerificationFailed,
                "no webhook secret configured",
            ));
        };

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_owned()
        };

        verify_signature(
            secret,
            &header("webhook-id"),
            &header("webhook-timestamp"),
            &header("webhook-signature"),
            body,
        )
        .map_err(|e| {
            LlmError::new(SLUG, ErrorCode::WebhookVerificationFailed, e.to_string())
        })
    }
}
