#![allow(dead_code)]

use investment_engine::application::ledger::CapacityLedgerService;
use investment_engine::application::reconciliation::ReconciliationProcessor;
use investment_engine::application::submission::{InvestmentRequest, InvestmentValidator, Submission};
use investment_engine::config::InvestmentLimits;
use investment_engine::domain::event::{EventKind, PaymentEvent};
use investment_engine::domain::investment::Investment;
use investment_engine::domain::location::{Location, LocationId};
use investment_engine::domain::money::{Amount, Money};
use investment_engine::domain::ports::LedgerStoreHandle;
use investment_engine::error::Result;
use investment_engine::infrastructure::gateway::SimulatedGateway;
use investment_engine::infrastructure::in_memory::{
    InMemoryInvestmentStore, InMemoryLedgerStore, InMemoryLocationDirectory, InMemoryNotifier,
};
use rust_decimal::Decimal;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// The full in-memory engine wired the way the binary wires it.
pub struct Harness {
    pub locations: Arc<InMemoryLocationDirectory>,
    pub investments: Arc<InMemoryInvestmentStore>,
    pub ledger: Arc<CapacityLedgerService>,
    pub gateway: Arc<SimulatedGateway>,
    pub notifier: Arc<InMemoryNotifier>,
    pub validator: Arc<InvestmentValidator>,
    pub processor: Arc<ReconciliationProcessor>,
}

impl Harness {
    pub fn new(locations: impl IntoIterator<Item = Location>) -> Self {
        Self::with_timeout(locations, chrono::Duration::hours(24))
    }

    pub fn with_timeout(
        locations: impl IntoIterator<Item = Location>,
        confirmation_timeout: chrono::Duration,
    ) -> Self {
        Self::assemble(locations, Arc::new(InMemoryLedgerStore::new()), confirmation_timeout)
    }

    /// Same wiring over a caller-supplied ledger store.
    pub fn with_ledger_store(locations: impl IntoIterator<Item = Location>, ledger_store: LedgerStoreHandle) -> Self {
        Self::assemble(locations, ledger_store, chrono::Duration::hours(24))
    }

    fn assemble(
        locations: impl IntoIterator<Item = Location>,
        ledger_store: LedgerStoreHandle,
        confirmation_timeout: chrono::Duration,
    ) -> Self {
        let locations = Arc::new(InMemoryLocationDirectory::from_locations(locations));
        let investments = Arc::new(InMemoryInvestmentStore::new());
        let ledger = Arc::new(CapacityLedgerService::new(
            ledger_store,
            locations.clone(),
            investments.clone(),
        ));
        let gateway = Arc::new(SimulatedGateway::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let validator = Arc::new(InvestmentValidator::new(
            InvestmentLimits::default(),
            locations.clone(),
            ledger.clone(),
            investments.clone(),
            gateway.clone(),
        ));
        let processor = Arc::new(ReconciliationProcessor::new(
            investments.clone(),
            investments.clone(),
            ledger.clone(),
            gateway.clone(),
            notifier.clone(),
            confirmation_timeout,
        ));
        Self {
            locations,
            investments,
            ledger,
            gateway,
            notifier,
            validator,
            processor,
        }
    }

    pub async fn invest(&self, user_id: u32, location_id: LocationId, amount: Decimal) -> Result<Submission> {
        self.validator
            .submit(InvestmentRequest {
                user_id,
                location_id,
                amount,
                notes: None,
            })
            .await
    }
}

/// A pending investment that has not been through the validator.
pub fn pending(user_id: u32, location_id: LocationId, amount: Decimal) -> Investment {
    Investment::new(user_id, location_id, Amount::new(amount).unwrap(), "usd", None, chrono::Utc::now())
}

pub fn location(id: LocationId, limit: Decimal) -> Location {
    Location::new(id, format!("Location {id}"), Money::new(limit))
}

pub fn event(event_id: &str, kind: EventKind, payment_id: &str) -> PaymentEvent {
    PaymentEvent {
        external_event_id: event_id.to_string(),
        kind,
        payment_reference: payment_id.to_string(),
        payload: serde_json::json!({ "id": payment_id }),
    }
}

/// Writes `lines` to a temporary CSV file, one per line.
pub fn csv_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file
}
