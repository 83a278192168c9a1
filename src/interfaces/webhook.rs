//! Gateway webhook boundary: signature verification and envelope parsing.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex>`, where the
//! hex value is HMAC-SHA256 over `"{t}.{payload}"` keyed with the endpoint
//! secret.

use crate::domain::event::{EventKind, PaymentEvent};
use crate::error::{InvestmentError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::error;

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    fn mac(&self) -> Result<HmacSha256> {
        let key = self.secret.strip_prefix("whsec_").unwrap_or(&self.secret);
        HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|_| InvestmentError::Signature("invalid webhook secret".into()))
    }

    /// Produces a signature header for `payload`, as the gateway would.
    pub fn sign(&self, payload: &str, timestamp: i64) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        Ok(format!(
            "t={timestamp},v1={}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    pub fn verify(&self, payload: &str, signature_header: &str, now: DateTime<Utc>) -> Result<()> {
        let mut timestamp: Option<i64> = None;
        let mut signatures = Vec::new();
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| reject("missing timestamp"))?;
        if signatures.is_empty() {
            return Err(reject("missing v1 signature"));
        }
        if (now.timestamp() - timestamp).abs() > self.tolerance_secs {
            return Err(reject("timestamp outside tolerance"));
        }

        let signed_payload = format!("{timestamp}.{payload}");
        for candidate in signatures {
            let Ok(expected) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = self.mac()?;
            mac.update(signed_payload.as_bytes());
            if mac.verify_slice(&expected).is_ok() {
                return Ok(());
            }
        }
        Err(reject("signature mismatch"))
    }
}

fn reject(reason: &str) -> InvestmentError {
    error!(reason, "webhook signature rejected");
    InvestmentError::Signature(reason.to_string())
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

/// Parses the gateway's JSON envelope into a `PaymentEvent`. Event types the
/// engine acts on must name their payment; other types may omit it.
pub fn parse_event(payload: &str) -> Result<PaymentEvent> {
    let envelope: Envelope = serde_json::from_str(payload)?;
    let kind = EventKind::from(envelope.event_type);
    let reference_field = match kind {
        EventKind::DisputeCreated => "payment_intent",
        _ => "id",
    };
    let reference = envelope
        .data
        .object
        .get(reference_field)
        .and_then(|value| value.as_str())
        .filter(|reference| !reference.is_empty());
    let payment_reference = match (reference, &kind) {
        (Some(reference), _) => reference.to_string(),
        (None, EventKind::Other(_)) => String::new(),
        (None, _) => {
            return Err(<serde_json::Error as serde::de::Error>::custom(format!(
                "{} event {} has no data.object.{reference_field}",
                kind.as_str(),
                envelope.id
            ))
            .into());
        }
    };

    Ok(PaymentEvent {
        external_event_id: envelope.id,
        kind,
        payment_reference,
        payload: envelope.data.object,
    })
}
