//! The chat-completions backend (`sync-a`).
//!
//! Responds inline on the submission call. Requests are chat-shaped: a
//! message array plus the passthrough options; responses carry the output in
//! `choices[0].message.content`.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use broker_common::job::ProviderConfig;

use crate::client::{ProviderClient, ProviderCredentials};
use crate::error::{classify_http_error, classify_transport_error, ErrorCode, LlmError};
use crate::types::{LlmRequest, LlmResult, Usage};

pub const SLUG: &str = "sync-a";

pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ChatCompletionsClient {
    pub fn new(client: reqwest::Client, credentials: ProviderCredentials) -> Self {
        Self {
            client,
            api_key: credentials.api_key,
            base_url: credentials.base_url,
        }
    }

    fn endpoint(&self, provider: &ProviderConfig) -> String {
        let base = provider.base_url().unwrap_or(&self.base_url);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

fn request_body(request: &LlmRequest, provider: &ProviderConfig) -> Value {
    let mut body = Map::new();
    body.insert("model".to_owned(), json!(request.model));
    body.insert("messages".to_owned(), request.chat_messages());
    if let Some(max_tokens) = provider.max_tokens() {
        body.insert("max_tokens".to_owned(), json!(max_tokens));
    }
    // Passthrough options last; protected keys were already stripped, so a
    // caller cannot override the framing above.
    for (key, value) in request.passthrough() {
        body.insert(key, value);
    }
    Value::Object(body)
}

fn parse_response(value: &Value) -> Result<LlmResult, LlmError> {
    let output = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            LlmError::new(SLUG, ErrorCode::Unknown, "response contained no output text")
        })?;

    let usage: Option<Usage> = value
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok());

    Ok(LlmResult {
        output: output.to_owned(),
        usage,
        model: value.get("model").and_then(Value::as_str).map(str::to_owned),
        response_id: value.get("id").and_then(Value::as_str).map(str::to_owned),
    })
}

#[async_trait]
impl ProviderClient for ChatCompletionsClient {
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
            .bearer_auth(&self.api_key)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::types::Json;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            slug: SLUG.to_owned(),
            kind: broker_common::job::ProviderKind::Sync,
            active: true,
            timeout_seconds: 120,
            max_retries: 3,
            retry_delay_seconds: 30,
            config: Json(
                json!({"default_model": "chat-large-1", "max_tokens": 1024})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        }
    }

    fn request() -> LlmRequest {
        LlmRequest {
            prompt: "Hello".to_owned(),
            system_prompt: None,
            messages: None,
            input: json!({"temperature": 0.1, "model": "smuggled"})
                .as_object()
                .cloned()
                .unwrap(),
            model: "chat-large-1".to_owned(),
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = request_body(&request(), &provider());

        assert_eq!(body["model"], "chat-large-1");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["temperature"], 0.1);
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": "Hello"}])
        );
    }

    #[test]
    fn test_parse_response_extracts_output_and_usage() {
        let value = json!({
            "id": "chatcmpl-1",
            "model": "chat-large-1",
            "choices": [{"message": {"role": "assistant", "content": "Hi"}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        });

        let result = parse_response(&value).expect("should parse");
        assert_eq!(result.output, "Hi");
        assert_eq!(result.response_id.as_deref(), Some("chatcmpl-1"));
        assert_eq!(result.usage.unwrap().total_tokens, Some(4));
    }

    #[test]
    fn test_parse_response_without_output_fails() {
        let value = json!({"choices": []});
        let error = parse_response(&value).expect_err("no output to extract");
        assert_eq!(error.code, ErrorCode::Unknown);
    }
}
