use crate::domain::event::WebhookReceipt;
use crate::domain::investment::{Investment, InvestmentId, InvestmentStatus};
use crate::domain::ledger::CapacityLedger;
use crate::domain::location::{Location, LocationId};
use crate::domain::ports::{
    InvestmentStore, LedgerMutation, LedgerStore, LocationDirectory, Notification, Notifier,
    ReceiptStore,
};
use crate::error::{InvestmentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory capacity ledger store.
///
/// `update` runs the whole read-modify-write under the write lock, which is
/// the serialization point for every reservation.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    ledgers: Arc<RwLock<HashMap<LocationId, CapacityLedger>>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get(&self, location_id: LocationId) -> Result<Option<CapacityLedger>> {
        let ledgers = self.ledgers.read().await;
        Ok(ledgers.get(&location_id).cloned())
    }

    async fn update(
        &self,
        location_id: LocationId,
        seed: Option<CapacityLedger>,
        mutation: LedgerMutation<'_>,
    ) -> Result<CapacityLedger> {
        let mut ledgers = self.ledgers.write().await;
        let mut ledger = match ledgers.get(&location_id) {
            Some(existing) => existing.clone(),
            None => seed.ok_or(InvestmentError::UnknownLedger(location_id))?,
        };
        mutation(&mut ledger)?;
        ledgers.insert(location_id, ledger.clone());
        Ok(ledger)
    }

    async fn get_all(&self) -> Result<Vec<CapacityLedger>> {
        let ledgers = self.ledgers.read().await;
        Ok(ledgers.values().cloned().collect())
    }
}

#[derive(Default)]
struct InvestmentTables {
    investments: HashMap<InvestmentId, Investment>,
    by_payment_id: HashMap<String, InvestmentId>,
    receipts: HashMap<String, WebhookReceipt>,
}

impl InvestmentTables {
    /// A payment id belongs to one investment for good.
    fn index(&mut self, investment: &Investment) -> Result<()> {
        let Some(payment_id) = &investment.external_payment_id else {
            return Ok(());
        };
        match self.by_payment_id.get(payment_id) {
            Some(owner) if *owner != investment.id => Err(InvestmentError::InvariantViolation(format!(
                "payment {payment_id} already belongs to investment {owner}"
            ))),
            _ => {
                self.by_payment_id.insert(payment_id.clone(), investment.id);
                Ok(())
            }
        }
    }
}

/// In-memory investments, their payment index and the webhook receipt table.
#[derive(Default, Clone)]
pub struct InMemoryInvestmentStore {
    tables: Arc<RwLock<InvestmentTables>>,
}

impl InMemoryInvestmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvestmentStore for InMemoryInvestmentStore {
    async fn insert(&self, investment: Investment) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.index(&investment)?;
        tables.investments.insert(investment.id, investment);
        Ok(())
    }

    async fn get(&self, id: InvestmentId) -> Result<Option<Investment>> {
        let tables = self.tables.read().await;
        Ok(tables.investments.get(&id).cloned())
    }

    async fn find_by_payment_id(&self, external_payment_id: &str) -> Result<Option<Investment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_payment_id
            .get(external_payment_id)
            .and_then(|id| tables.investments.get(id))
            .cloned())
    }

    async fn list_by_location(&self, location_id: LocationId) -> Result<Vec<Investment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .investments
            .values()
            .filter(|investment| investment.location_id == location_id)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, statuses: &[InvestmentStatus]) -> Result<Vec<Investment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .investments
            .values()
            .filter(|investment| statuses.contains(&investment.status))
            .cloned()
            .collect())
    }

    async fn compare_and_swap(&self, expected: InvestmentStatus, next: Investment) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let current = tables
            .investments
            .get(&next.id)
            .ok_or_else(|| InvestmentError::NotFound(next.reference.clone()))?;
        if current.status != expected {
            return Ok(false);
        }
        tables.index(&next)?;
        tables.investments.insert(next.id, next);
        Ok(true)
    }
}

#[async_trait]
impl ReceiptStore for InMemoryInvestmentStore {
    async fn claim(
        &self,
        external_event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> Result<WebhookReceipt> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .receipts
            .entry(external_event_id.to_string())
            .or_insert_with(|| WebhookReceipt::new(external_event_id, event_type, received_at))
            .clone())
    }

    async fn mark_applied(&self, external_event_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(receipt) = tables.receipts.get_mut(external_event_id) {
            receipt.applied = true;
        }
        Ok(())
    }
}

/// Location directory backed by a fixed set of locations.
#[derive(Default, Clone)]
pub struct InMemoryLocationDirectory {
    locations: Arc<RwLock<HashMap<LocationId, Location>>>,
}

impl InMemoryLocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        let map = locations
            .into_iter()
            .map(|location| (location.id, location))
            .collect();
        Self {
            locations: Arc::new(RwLock::new(map)),
        }
    }

    /// Inserts or replaces a location, e.g. when an operator changes its cap.
    pub async fn upsert(&self, location: Location) {
        self.locations.write().await.insert(location.id, location);
    }
}

#[async_trait]
impl LocationDirectory for InMemoryLocationDirectory {
    async fn get(&self, location_id: LocationId) -> Result<Option<Location>> {
        let locations = self.locations.read().await;
        Ok(locations.get(&location_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Location>> {
        let locations = self.locations.read().await;
        Ok(locations.values().cloned().collect())
    }
}

/// Collects notifications instead of delivering them.
#[derive(Default, Clone)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.sent.write().await.push(notification);
        Ok(())
    }
}
