//! The messages-API backend (`sync-b`).
//!
//! Responds inline. The system prompt is a top-level parameter rather than a
//! message role, and output text is delivered as a list of content segments.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use broker_common::job::ProviderConfig;

use crate::client::{ProviderClient, ProviderCredentials};
use crate::error::{classify_http_error, classify_transport_error, ErrorCode, LlmError};
use crate::types::{LlmRequest, LlmResult, Usage};

pub const SLUG: &str = "sync-b";

/// The messages API rejects requests without a token budget.
const FALLBACK_MAX_TOKENS: u64 = 1024;

pub struct MessagesClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl MessagesClient {
    pub fn new(client: reqwest::Client, credentials: ProviderCredentials) -> Self {
        Self {
            client,
            api_key: credentials.api_key,
            base_url: credentials.base_url,
        }
    }

    fn endpoint(&self, provider: &ProviderConfig) -> String {
        let base = provider.base_url().unwrap_or(&self.base_url);
        format!("{}/messages", base.trim_end_matches('/'))
    }
}

fn request_body(request: &LlmRequest, provider: &ProviderConfig) -> Value {
    let mut body = Map::new();
    body.insert("model".to_owned(), json!(request.model));
    body.insert(
        "max_tokens".to_owned(),
        json!(provider.max_tokens().unwrap_or(FALLBACK_MAX_TOKENS)),
    );
    if let Some(system) = &request.system_prompt {
        body.insert("system".to_owned(), json!(system));
    }
    let messages = match &request.messages {
        Some(structured) => structured.clone(),
        None => json!([{"role": "user", "content": request.prompt}]),
    };
    body.insert("messages".to_owned(), messages);
    for (key, value) in request.passthrough() {
        body.insert(key, value);
    }
    Value::Object(body)
}

fn parse_response(value: &Value) -> Result<LlmResult, LlmError> {
    let segments = value
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            LlmError::new(SLUG, ErrorCode::Unknown, "response contained no content")
        })?;

    let output: String = segments
        .iter()
        .filter(|segment| segment.get("type").and_then(Value::as_str) == Some("text"))
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
impl ProviderClient for MessagesClient {
    fn slug(&self) -> &str {
        SLUG
    }

    async fn execute(
        &self,
        request: &LlmRequest,
        provider: &ProviderConfig,
    ) -> Result<LlmResult, LlmError> {
        let response = self
            .client
            .post(self.endpoint(provider))
            .header("x-api-key", &self.api_key)
            .json(&request_body(request, provider))
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
}
