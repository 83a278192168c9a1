use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Gateway event types this engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Succeeded,
    PaymentFailed,
    Canceled,
    DisputeCreated,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Succeeded => "payment_intent.succeeded",
            Self::PaymentFailed => "payment_intent.payment_failed",
            Self::Canceled => "payment_intent.canceled",
            Self::DisputeCreated => "charge.dispute.created",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "payment_intent.succeeded" => Self::Succeeded,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            "payment_intent.canceled" => Self::Canceled,
            "charge.dispute.created" => Self::DisputeCreated,
            _ => Self::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A gateway event after signature verification and envelope parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub external_event_id: String,
    pub kind: EventKind,
    /// The gateway's payment intent id, matched against `external_payment_id`.
    pub payment_reference: String,
    pub payload: serde_json::Value,
}

/// Dedup row for one external event id. `applied` flips to true in the same
/// atomic step as the investment state change it caused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub external_event_id: String,
    pub event_type: String,
    pub received_at: DateTime<Utc>,
    pub applied: bool,
}

impl WebhookReceipt {
    pub fn new(external_event_id: impl Into<String>, event_type: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            external_event_id: external_event_id.into(),
            event_type: event_type.into(),
            received_at,
            applied: false,
        }
    }
}
