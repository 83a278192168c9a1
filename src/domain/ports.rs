use super::event::WebhookReceipt;
use super::investment::{Investment, InvestmentId, InvestmentStatus, UserId};
use super::ledger::CapacityLedger;
use super::location::{Location, LocationId};
use super::money::Amount;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pure change to one ledger row. Must be safe to run more than once
/// against fresh copies of the row (optimistic stores retry it).
pub type LedgerMutation<'a> = &'a (dyn Fn(&mut CapacityLedger) -> Result<()> + Send + Sync);

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get(&self, location_id: LocationId) -> Result<Option<CapacityLedger>>;

    /// Applies `mutation` to the row for `location_id` as one atomic
    /// read-modify-write. A missing row is created from `seed`; without a seed
    /// a missing row is `UnknownLedger`. If `mutation` fails nothing is written.
    async fn update(
        &self,
        location_id: LocationId,
        seed: Option<CapacityLedger>,
        mutation: LedgerMutation<'_>,
    ) -> Result<CapacityLedger>;

    async fn get_all(&self) -> Result<Vec<CapacityLedger>>;
}

#[async_trait]
pub trait InvestmentStore: Send + Sync {
    async fn insert(&self, investment: Investment) -> Result<()>;
    async fn get(&self, id: InvestmentId) -> Result<Option<Investment>>;
    async fn find_by_payment_id(&self, external_payment_id: &str) -> Result<Option<Investment>>;
    async fn list_by_location(&self, location_id: LocationId) -> Result<Vec<Investment>>;
    async fn list_by_status(&self, statuses: &[InvestmentStatus]) -> Result<Vec<Investment>>;

    /// Replaces the stored investment with `next` only if its status is still
    /// `expected`. Returns false if the status moved. A payment id already
    /// indexed for another investment is an `InvariantViolation`.
    async fn compare_and_swap(&self, expected: InvestmentStatus, next: Investment) -> Result<bool>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Inserts a receipt for `external_event_id` or returns the existing one.
    async fn claim(
        &self,
        external_event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> Result<WebhookReceipt>;

    async fn mark_applied(&self, external_event_id: &str) -> Result<()>;
}

#[async_trait]
pub trait LocationDirectory: Send + Sync {
    async fn get(&self, location_id: LocationId) -> Result<Option<Location>>;
    async fn get_all(&self) -> Result<Vec<Location>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresConfirmation,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, investment: &Investment) -> std::result::Result<PaymentIntent, GatewayError>;
    async fn retrieve_intent(&self, external_payment_id: &str) -> std::result::Result<IntentStatus, GatewayError>;
    async fn refund(&self, external_payment_id: &str, amount: Amount) -> std::result::Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    InvestmentCompleted {
        reference: String,
        user_id: UserId,
        location_id: LocationId,
        amount: Amount,
    },
    InvestmentRefunded {
        reference: String,
        user_id: UserId,
        location_id: LocationId,
        amount: Amount,
    },
    OperatorAlert {
        subject: String,
        detail: String,
    },
}

/// Fire-and-forget delivery. Callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

pub type LedgerStoreHandle = Arc<dyn LedgerStore>;
pub type InvestmentStoreHandle = Arc<dyn InvestmentStore>;
pub type ReceiptStoreHandle = Arc<dyn ReceiptStore>;
pub type LocationDirectoryHandle = Arc<dyn LocationDirectory>;
pub type PaymentGatewayHandle = Arc<dyn PaymentGateway>;
pub type NotifierHandle = Arc<dyn Notifier>;
