//! Normalized request and result shapes shared by all provider clients.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use broker_common::job::Job;

/// Keys a caller may not smuggle through the free-form `input` bag. Routing
/// and framing are owned by the broker.
pub const PROTECTED_INPUT_KEYS: [&str; 7] = [
    "model",
    "messages",
    "input",
    "stream",
    "system",
    "max_tokens",
    "max_output_tokens",
];

/// A normalized provider request, assembled from a claimed job.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Optional structured conversation; when present it replaces the
    /// prompt/system pair as the message list.
    pub messages: Option<Value>,
    /// The caller's free-form options, spread onto provider calls after the
    /// protected keys are stripped.
    pub input: Map<String, Value>,
    pub model: String,
}

impl LlmRequest {
    /// Build a request from a claimed job. `None` if the job carries no
    /// resolved model; the worker exhausts such jobs instead of calling out.
    pub fn from_job(job: &Job) -> Option<Self> {
        let model = job.model.clone()?;
        Some(Self {
            prompt: job.prompt.clone(),
            system_prompt: job.system_prompt.clone(),
            messages: job.messages.as_ref().map(|m| m.0.clone()),
            input: job.input.0.clone(),
            model,
        })
    }

    /// The passthrough portion of the input bag: everything except the
    /// protected keys.
    pub fn passthrough(&self) -> Map<String, Value> {
        self.input
            .iter()
            .filter(|(key, _)| !PROTECTED_INPUT_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// The conversation as a chat-shaped message array.
    pub fn chat_messages(&self) -> Value {
        if let Some(messages) = &self.messages {
            return messages.clone();
        }

        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": self.prompt}));
        Value::Array(messages)
    }
}

/// Token accounting as reported by a provider. Field names vary per backend;
/// aliases cover the two conventions we consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(alias = "prompt_tokens", skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(alias = "completion_tokens", skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// A normalized successful provider response.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResult {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl LlmResult {
    /// The JSON stored into the job's result column.
    pub fn to_value(&self) -> Value {
        // LlmResult serializes to a plain object.
        serde_json::to_value(self).unwrap_or_else(|_| json!({"output": self.output}))
    }
}
