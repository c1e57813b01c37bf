//! Structured diagnostic events.
//!
//! Every guard trip in the callback receiver and every processing error is
//! appended to the diagnostic log. Payloads attached here are sanitized so
//! the log never stores model output text; the verbatim payload lives in the
//! DLQ instead, where it is needed for replay.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::job::JobStatus;

/// Keys whose values carry model output in provider payload shapes.
const OUTPUT_KEYS: [&str; 7] = [
    "output",
    "output_text",
    "content",
    "text",
    "choices",
    "message",
    "delta",
];

/// An append-only diagnostic record.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticEvent {
    pub event_type: &'static str,
    pub job_id: Option<Uuid>,
    pub provider_slug: Option<String>,
    pub tenant_id: Option<Uuid>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub job_status_at_receipt: Option<JobStatus>,
    pub expected_response_id: Option<String>,
    pub received_response_id: Option<String>,
    pub response_payload: Option<Value>,
}

impl DiagnosticEvent {
    pub fn new(event_type: &'static str) -> Self {
        Self {
            event_type,
            ..Default::default()
        }
    }

    pub fn job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn provider(mut self, slug: &str) -> Self {
        self.provider_slug = Some(slug.to_owned());
        self
    }

    pub fn tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn error(mut self, code: Option<&str>, message: &str) -> Self {
        self.error_code = code.map(str::to_owned);
        self.error_message = Some(message.to_owned());
        self
    }

    pub fn status_at_receipt(mut self, status: JobStatus) -> Self {
        self.job_status_at_receipt = Some(status);
        self
    }

    pub fn response_ids(mut self, expected: Option<&str>, received: Option<&str>) -> Self {
        self.expected_response_id = expected.map(str::to_owned);
        self.received_response_id = received.map(str::to_owned);
        self
    }

    /// Attach a provider payload, sanitized.
    pub fn payload(mut self, payload: &Value) -> Self {
        self.response_payload = Some(sanitize_payload(payload));
        self
    }
}

/// Recursively replace output-bearing values so log rows never contain model
/// text. Structure and ids are kept for debugging.
pub fn sanitize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                if OUTPUT_KEYS.contains(&key.as_str()) {
                    sanitized.insert(key.clone(), json!("[redacted]"));
                } else {
                    sanitized.insert(key.clone(), sanitize_payload(value));
                }
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_payload).collect()),
        other => other.clone(),
    }
}
