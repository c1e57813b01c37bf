//! Dead-letter replay driver.
//!
//! On an interval, pending DLQ entries older than the cooldown are posted
//! back to the callback receiver's replay path. The receiver re-runs the
//! stored payload and resolves the entry itself; this driver only delivers
//! and reports. Entries whose replay fails again simply stay pending for the
//! next sweep.

use serde_json::json;
use tracing::{debug, warn};

use broker_common::store::JobStore;

use crate::error::JanitorError;

pub struct ReplaySettings {
    /// The receiver's replay endpoint, e.g.
    /// `http://broker-api/llm-webhook?source=dlq`.
    pub replay_url: String,
    pub queue_secret: String,
    /// Entries younger than this are left alone; a callback that just failed
    /// may still be racing its own error handling.
    pub cooldown_seconds: i64,
    pub batch_size: i64,
}

/// Post each eligible entry to the replay endpoint. Returns how many were
/// delivered (not how many resolved; resolution is the receiver's call).
pub async fn replay_pending(
    store: &JobStore,
    client: &reqwest::Client,
    settings: &ReplaySettings,
) -> Result<usize, JanitorError> {
    let entries = store
        .pending_dlq_entries(settings.cooldown_seconds, settings.batch_size)
        .await?;

    if entries.is_empty() {
        return Ok(0);
    }

    debug!(count = entries.len(), "replaying dead-letter entries");

    let mut delivered = 0;
    for entry in entries {
        let body = json!({
            "dlq_id": entry.dlq_id,
            "webhook_payload": entry.webhook_payload.0,
            "provider_slug": entry.provider_slug,
        });

        let response = client
            .post(&settings.replay_url)
            .header("x-queue-secret", &settings.queue_secret)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                metrics::counter!("llm_dlq_replay_delivered").increment(1);
                delivered += 1;
            }
            Ok(response) => {
                warn!(
                    dlq_id = entry.dlq_id,
                    status = response.status().as_u16(),
                    "replay endpoint did not accept the entry"
                );
            }
            Err(e) => {
                warn!(dlq_id = entry.dlq_id, "failed to deliver replay: {}", e);
            }
        }
    }

    Ok(delivered)
}
