//! Callback signature verification.
//!
//! The async provider signs callbacks in the standard-webhooks format: the
//! signed content is `{webhook_id}.{timestamp}.{body}`, keyed with the
//! configured shared secret (optionally `whsec_`-prefixed base64). The
//! signature header may list several space-separated `v1,<base64>` entries
//! during secret rotation; verification passes if any entry matches.
//! Comparison is constant-time via `Mac::verify_slice`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature material: {0}")]
    MissingHeader(&'static str),
    #[error("signature did not match any provided value")]
    Mismatch,
}

/// Decode the shared secret. A `whsec_` prefix marks a base64-encoded key;
/// anything else is used as raw bytes.
fn secret_bytes(secret: &str) -> Vec<u8> {
    match secret.strip_prefix("whsec_") {
        Some(encoded) => BASE64
            .decode(encoded)
            .unwrap_or_else(|_| encoded.as_bytes().to_vec()),
        None => secret.as_bytes().to_vec(),
    }
}

/// Verify a signed callback payload.
pub fn verify_signature(
    secret: &str,
    webhook_id: &str,
    timestamp: &str,
    signature_header: &str,
    body: &[u8],
) -> Result<(), SignatureError> {
    if webhook_id.is_empty() {
        return Err(SignatureError::MissingHeader("webhook-id"));
    }
    if timestamp.is_empty() {
        return Err(SignatureError::MissingHeader("webhook-timestamp"));
    }
    if signature_header.is_empty() {
        return Err(SignatureError::MissingHeader("webhook-signature"));
    }

    let key = secret_bytes(secret);

    for entry in signature_header.split_whitespace() {
        let Some(encoded) = entry.strip_prefix("v1,") else {
            continue;
        };
        let Ok(candidate) = BASE64.decode(encoded) else {
            continue;
        };

        // HMAC accepts keys of any size.
        let mut mac = HmacSha256::new_from_slice(&key)
            .expect("HMAC can take key of any size");
        mac.update(webhook_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);

        if mac.verify_slice(&candidate).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

/// Produce a `v1,<base64>` signature entry. Used by tests and by the replay
/// tooling when re-posting payloads through signed paths.
pub fn sign(secret: &str, webhook_id: &str, timestamp: &str, body: &[u8]) -> String {
    let key = secret_bytes(secret);
    let mut mac =
        HmacSha256::new_from_slice(&key).expect("HMAC can take key of any size");
    mac.update(webhook_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("v1,{}", BASE64.encode(mac.finalize().into_bytes()))
}
