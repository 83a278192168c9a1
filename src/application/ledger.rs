use crate::domain::investment::{Investment, InvestmentId};
use crate::domain::ledger::{CapacityLedger, LedgerSnapshot};
use crate::domain::location::LocationId;
use crate::domain::ports::{InvestmentStoreHandle, LedgerStoreHandle, LocationDirectoryHandle};
use crate::error::{InvestmentError, Result, ValidationError};
use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Authoritative capacity counter per location.
///
/// Every mutation goes through `LedgerStore::update`, so a reservation is a
/// single atomic read-modify-write on the location's row. This is the only
/// admission point for new capital.
pub struct CapacityLedgerService {
    store: LedgerStoreHandle,
    locations: LocationDirectoryHandle,
    investments: InvestmentStoreHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub before: LedgerSnapshot,
    pub after: LedgerSnapshot,
    pub drifted: bool,
}

impl CapacityLedgerService {
    pub fn new(
        store: LedgerStoreHandle,
        locations: LocationDirectoryHandle,
        investments: InvestmentStoreHandle,
    ) -> Self {
        Self {
            store,
            locations,
            investments,
        }
    }

    /// Admits `investment` against its location's cap. The reservation is
    /// journaled under the investment id, so retrying it is harmless.
    pub async fn reserve(&self, investment: &Investment) -> Result<CapacityLedger> {
        let location_id = investment.location_id;
        let location = self
            .locations
            .get(location_id)
            .await?
            .ok_or(ValidationError::UnknownLocation(location_id))?;

        let seed = CapacityLedger::new(location_id, location.investment_limit);
        let ledger = self
            .store
            .update(location_id, Some(seed), &|ledger| {
                ledger
                    .reserve(&location, investment.id, investment.user_id, investment.amount)
                    .map_err(InvestmentError::from)
            })
            .await?;

        debug!(
            location_id,
            investment_id = %investment.id,
            amount = %investment.amount,
            total_invested = %ledger.total_invested,
            "capacity reserved"
        );
        Ok(ledger)
    }

    pub async fn release(&self, location_id: LocationId, investment_id: InvestmentId) -> Result<bool> {
        let changed = self
            .apply(location_id, &|ledger| ledger.release(investment_id))
            .await
            .inspect_err(|e| error!(location_id, %investment_id, error = %e, "capacity release failed"))?;
        debug!(location_id, %investment_id, changed, "capacity released");
        Ok(changed)
    }

    /// Brings the ledger up to the effect of `investment`'s current status.
    /// Returns `true` only for the call that actually landed the effect.
    pub async fn settle(&self, investment: &Investment) -> Result<bool> {
        let (location_id, investment_id, status) = (investment.location_id, investment.id, investment.status);
        let changed = self
            .apply(location_id, &|ledger| ledger.settle(investment_id, status))
            .await
            .inspect_err(|e| error!(location_id, %investment_id, %status, error = %e, "ledger settlement failed"))?;
        if changed {
            debug!(location_id, %investment_id, %status, "ledger settled");
        }
        Ok(changed)
    }

    /// Runs a journaled mutation and reports whether its final (committed)
    /// attempt changed anything.
    async fn apply(
        &self,
        location_id: LocationId,
        mutation: &(dyn Fn(&mut CapacityLedger) -> Result<bool> + Send + Sync),
    ) -> Result<bool> {
        let changed = AtomicBool::new(false);
        self.store
            .update(location_id, None, &|ledger| {
                changed.store(mutation(ledger)?, Ordering::SeqCst);
                Ok(())
            })
            .await?;
        Ok(changed.load(Ordering::SeqCst))
    }

    pub async fn snapshot(&self, location_id: LocationId) -> Result<LedgerSnapshot> {
        if let Some(ledger) = self.store.get(location_id).await? {
            return Ok(ledger.snapshot());
        }
        let location = self
            .locations
            .get(location_id)
            .await?
            .ok_or(ValidationError::UnknownLocation(location_id))?;
        Ok(LedgerSnapshot::empty(&location))
    }

    /// Snapshots for every location the directory knows about, by id.
    pub async fn snapshots(&self) -> Result<Vec<LedgerSnapshot>> {
        let mut locations = self.locations.get_all().await?;
        locations.sort_by_key(|location| location.id);

        let mut snapshots = Vec::with_capacity(locations.len());
        for location in locations {
            snapshots.push(self.snapshot(location.id).await?);
        }
        Ok(snapshots)
    }

    /// Drift correction. Moves every hold forward to what the investment
    /// records say, then recounts both totals from the holds inside the same
    /// row update, logging every field it had to fix. Holds whose investment
    /// is not stored yet stay counted.
    pub async fn audit_recompute(&self, location_id: LocationId) -> Result<AuditReport> {
        let location = self
            .locations
            .get(location_id)
            .await?
            .ok_or(ValidationError::UnknownLocation(location_id))?;
        let investments = self.investments.list_by_location(location_id).await?;

        let before = Mutex::new(LedgerSnapshot::empty(&location));
        let seed = CapacityLedger::new(location_id, location.investment_limit);
        let after = self
            .store
            .update(location_id, Some(seed), &|ledger| {
                if let Ok(mut slot) = before.lock() {
                    *slot = ledger.snapshot();
                }
                ledger.investment_limit = location.investment_limit;
                ledger.reconcile(&investments);
                Ok(())
            })
            .await?
            .snapshot();
        let before = before
            .into_inner()
            .map_err(|e| InvestmentError::InternalError(e.to_string().into()))?;

        if before.total_invested != after.total_invested {
            warn!(
                location_id,
                recorded = %before.total_invested,
                recomputed = %after.total_invested,
                "audit corrected total_invested"
            );
        }
        if before.total_investors != after.total_investors {
            warn!(
                location_id,
                recorded = before.total_investors,
                recomputed = after.total_investors,
                "audit corrected total_investors"
            );
        }
        let drifted = before.total_invested != after.total_invested
            || before.total_investors != after.total_investors;
        Ok(AuditReport {
            before,
            after,
            drifted,
        })
    }
}
