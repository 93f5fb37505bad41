/// Webhook signature verification and event parsing
///
/// The provider signs each delivery with a `Stripe-Signature` header of the
/// form `t=<unix seconds>,v1=<hex>` where the hex value is
/// HMAC-SHA256(secret, "{t}.{raw body}"). Several `v1` entries may be present
/// while a secret is being rolled; any one matching is enough.

use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value as JsonValue;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed delivery in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Webhook errors
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingHeader,

    #[error("Malformed signature header")]
    MalformedHeader,

    #[error("No signature matches the payload")]
    SignatureMismatch,

    #[error("Timestamp outside the tolerance window")]
    TimestampOutsideTolerance,

    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl WebhookError {
    /// Whether the error concerns the signature rather than the body
    pub fn is_signature_error(&self) -> bool {
        !matches!(self, WebhookError::InvalidPayload(_))
    }
}

/// A webhook event
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: JsonValue,
}

impl Event {
    /// String field of the event object
    pub fn object_str(&self, field: &str) -> Option<&str> {
        self.data.object.get(field).and_then(JsonValue::as_str)
    }

    /// Integer field of the event object
    pub fn object_i64(&self, field: &str) -> Option<i64> {
        self.data.object.get(field).and_then(JsonValue::as_i64)
    }

    /// Event object decoded as a typed provider object
    pub fn object_as<T: DeserializeOwned>(&self) -> Result<T, WebhookError> {
        Ok(T::deserialize(&self.data.object)?)
    }

    /// Metadata value of the event object
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|metadata| metadata.get(key))
            .and_then(JsonValue::as_str)
    }
}

/// Signature for `payload` at `timestamp`, hex encoded
pub fn compute_signature(payload: &[u8], timestamp: i64, secret: &str) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a header value the way the provider does (used by tests and tooling)
pub fn signature_header(payload: &[u8], timestamp: i64, secret: &str) -> String {
    format!("t={},v1={}", timestamp, compute_signature(payload, timestamp, secret))
}

/// Verifies `header` against `payload` at time `now`
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }

    let matched = signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        // verify_slice compares in constant time
        mac.verify_slice(&expected).is_ok()
    });

    if !matched {
        return Err(WebhookError::SignatureMismatch);
    }

    if (now - timestamp).abs() > tolerance_secs {
        return Err(WebhookError::TimestampOutsideTolerance);
    }

    Ok(())
}

/// Verifies the signature, then parses the event
pub fn construct_event(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<Event, WebhookError> {
    let header = header.ok_or(WebhookError::MissingHeader)?;
    verify_signature(payload, header, secret, tolerance_secs, now)?;
    Ok(serde_json::from_slice(payload)?)
}
