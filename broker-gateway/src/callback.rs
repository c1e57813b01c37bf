//! Inbound callback payloads, normalized.
//!
//! Two shapes arrive at the receiver: the async provider's envelope
//! (`{id, type, data: {id, ...}}`, where the body must be retrieved by id)
//! and the generic shape used for dead-letter replay and non-envelope
//! providers (`{webhook_id, event_type, response_id, output?, error?}`,
//! carrying everything inline). Both normalize to a [`CallbackEvent`].

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::Usage;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CallbackParseError {
    #[error("callback payload is not a JSON object")]
    NotAnObject,
    #[error("callback payload carries no envelope id")]
    MissingWebhookId,
    #[error("callback payload carries no event type")]
    MissingEventType,
}

/// The event-type discriminator, matched on its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Completed,
    Failed,
    Incomplete,
    /// An event type this broker does not act on. Acked and logged.
    Other,
}

impl CallbackKind {
    pub fn from_event_type(event_type: &str) -> Self {
        if event_type.ends_with(".completed") {
            CallbackKind::Completed
        } else if event_type.ends_with(".failed") {
            CallbackKind::Failed
        } else if event_type.ends_with(".incomplete") {
            CallbackKind::Incomplete
        } else {
            CallbackKind::Other
        }
    }
}

/// A normalized callback.
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    /// The envelope id, recorded as the webhook id for idempotency.
    pub webhook_id: String,
    pub event_type: String,
    pub kind: CallbackKind,
    /// The provider-assigned response id this event refers to.
    pub response_id: Option<String>,
    /// The job id, when the payload carries it in its metadata.
    pub job_id: Option<Uuid>,
    /// Inline output text, when the payload carries the full body.
    pub output: Option<String>,
    pub usage: Option<Usage>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
}

fn string_at<'a>(payload: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
}

pub fn parse_callback(payload: &Value) -> Result<CallbackEvent, CallbackParseError> {
    if !payload.is_object() {
        return Err(CallbackParseError::NotAnObject);
    }

    let webhook_id = string_at(payload, &["/id", "/webhook_id"])
        .ok_or(CallbackParseError::MissingWebhookId)?
        .to_owned();

    let event_type = string_at(payload, &["/type", "/event_type"])
        .ok_or(CallbackParseError::MissingEventType)?
        .to_owned();

    let response_id =
        string_at(payload, &["/data/id", "/response_id"]).map(str::to_owned);

    let job_id = string_at(
        payload,
        &[
            "/data/metadata/job_id",
            "/metadata/job_id",
            "/job_id",
        ],
    )
    .and_then(|raw| Uuid::parse_str(raw).ok());

    let output = string_at(payload, &["/output"]).map(str::to_owned);

    let usage: Option<Usage> = payload
        .get("usage")
        .and_then(|u| serde_json::from_value(u.clone()).ok());

    let error_message =
        string_at(payload, &["/error/message", "/data/error/message"]).map(str::to_owned);
    let error_code =
        string_at(payload, &["/error/code", "/data/error/code"]).map(str::to_owned);

    Ok(CallbackEvent {
        kind: CallbackKind::from_event_type(&event_type),
        webhook_id,
        event_type,
        response_id,
        job_id,
        output,
        usage,
        error_message,
        error_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_provider_envelope() {
        let job_id = Uuid::now_v7();
        let payload = json!({
            "id": "evt_1",
            "type": "response.completed",
            "created_at": 1720000000,
            "data": {"id": "resp_1", "metadata": {"job_id": job_id}}
        });

        let event = parse_callback(&payload).expect("should parse");
        assert_eq!(event.webhook_id, "evt_1");
        assert_eq!(event.kind, CallbackKind::Completed);
        assert_eq!(event.response_id.as_deref(), Some("resp_1"));
        assert_eq!(event.job_id, Some(job_id));
        assert!(event.output.is_none());
    }

    #[test]
    fn test_parse_generic_shape() {
        let payload = json!({
            "webhook_id": "wh_9",
            "event_type": "job.completed",
            "response_id": "resp_9",
            "output": "inline result",
            "usage": {"input_tokens": 2, "output_tokens": 4}
        });

        let event = parse_callback(&payload).expect("should parse");
        assert_eq!(event.webhook_id, "wh_9");
        assert_eq!(event.kind, CallbackKind::Completed);
        assert_eq!(event.output.as_deref(), Some("inline result"));
        assert_eq!(event.usage.unwrap().output_tokens, Some(4));
    }

    #[test]
    fn test_parse_failure_event() {
        let payload = json!({
            "id": "evt_2",
            "type": "response.failed",
            "data": {"id": "resp_2", "error": {"message": "boom", "code": "server_error"}}
        });

        let event = parse_callback(&payload).expect("should parse");
        assert_eq!(event.kind, CallbackKind::Failed);
        assert_eq!(event.error_message.as_deref(), Some("boom"));
        assert_eq!(event.error_code.as_deref(), Some("server_error"));
    }

    #[test]
    fn test_unknown_event_types_are_other() {
        let payload = json!({"id": "evt_3", "type": "response.queued", "data": {"id": "resp_3"}});
        let event = parse_callback(&payload).expect("should parse");
        assert_eq!(event.kind, CallbackKind::Other);
    }

    #[test]
    fn test_missing_envelope_id_is_an_error() {
        let payload = json!({"type": "response.completed"});
        assert!(matches!(
            parse_callback(&payload),
            Err(CallbackParseError::MissingWebhookId)
        ));
        assert!(matches!(
            parse_callback(&json!("just a string")),
            Err(CallbackParseError::NotAnObject)
        ));
    }
}
