use super::investment::{Investment, InvestmentId, InvestmentStatus, UserId};
use super::location::{Location, LocationId};
use super::money::{Amount, Money};
use crate::error::{InvestmentError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-location record of committed capital.
///
/// `total_invested` counts every investment that still holds a reservation
/// (pending, processing or completed). `total_invested <= investment_limit`
/// holds after every successful `reserve`.
///
/// Each reservation is journaled in `holds` together with how far its
/// effects have landed, so replaying `release`, `finalize` or `refund` for the
/// same investment never counts twice. The methods here are pure mutations;
/// atomicity comes from the `LedgerStore` that applies them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityLedger {
    pub location_id: LocationId,
    pub total_invested: Money,
    pub total_investors: u32,
    pub investment_limit: Money,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub holds: BTreeMap<InvestmentId, Hold>,
}

/// Ledger-side view of one investment's reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub user_id: UserId,
    pub amount: Amount,
    pub state: HoldState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Reserved,
    Completed,
    Released,
    Refunded,
}

impl HoldState {
    pub fn for_status(status: InvestmentStatus) -> Self {
        match status {
            InvestmentStatus::Pending | InvestmentStatus::Processing => Self::Reserved,
            InvestmentStatus::Completed => Self::Completed,
            InvestmentStatus::Failed => Self::Released,
            InvestmentStatus::Refunded => Self::Refunded,
        }
    }

    fn holds_capacity(self) -> bool {
        matches!(self, Self::Reserved | Self::Completed)
    }

    /// Holds only ever move to a later stage.
    fn stage(self) -> u8 {
        match self {
            Self::Reserved => 0,
            Self::Completed | Self::Released => 1,
            Self::Refunded => 2,
        }
    }
}

/// Read-only projection for display. Never used to gate admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub location_id: LocationId,
    pub total_invested: Money,
    pub total_investors: u32,
    pub investment_limit: Money,
    pub remaining: Money,
}

impl CapacityLedger {
    pub fn new(location_id: LocationId, investment_limit: Money) -> Self {
        Self {
            location_id,
            total_invested: Money::ZERO,
            total_investors: 0,
            investment_limit,
            updated_at: Utc::now(),
            holds: BTreeMap::new(),
        }
    }

    /// Admits `amount` for `investment_id` against the location's cap,
    /// refreshing the limit snapshot from `location` first. Leaves the ledger
    /// untouched on rejection, and when the investment already holds a
    /// reservation here.
    pub fn reserve(
        &mut self,
        location: &Location,
        investment_id: InvestmentId,
        user_id: UserId,
        amount: Amount,
    ) -> Result<(), ValidationError> {
        if self.holds.contains_key(&investment_id) {
            return Ok(());
        }
        if !location.is_open_for_investment {
            return Err(ValidationError::LocationClosed(location.id));
        }
        let limit = location.investment_limit;
        let new_total = self.total_invested + amount.into();
        if new_total > limit {
            return Err(ValidationError::CapacityExceeded {
                location_id: location.id,
                requested: amount.value(),
                remaining: limit.saturating_sub(self.total_invested).value(),
            });
        }
        self.holds.insert(
            investment_id,
            Hold {
                user_id,
                amount,
                state: HoldState::Reserved,
            },
        );
        self.investment_limit = limit;
        self.total_invested = new_total;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Gives a reservation back. Returns `false` if it was already released.
    pub fn release(&mut self, investment_id: InvestmentId) -> Result<bool, InvestmentError> {
        let hold = self.hold(investment_id)?;
        match hold.state {
            HoldState::Released => Ok(false),
            HoldState::Reserved => {
                self.total_invested = self.subtract(hold.amount, "release")?;
                self.set_state(investment_id, HoldState::Released);
                Ok(true)
            }
            HoldState::Completed | HoldState::Refunded => Err(self.cannot(investment_id, hold.state, "release")),
        }
    }

    /// Counts the investor once their first investment here completes. The
    /// amount was already counted by `reserve`. Returns `false` if the
    /// completion had already landed.
    pub fn finalize(&mut self, investment_id: InvestmentId) -> Result<bool, InvestmentError> {
        let hold = self.hold(investment_id)?;
        match hold.state {
            HoldState::Completed | HoldState::Refunded => Ok(false),
            HoldState::Released => Err(self.cannot(investment_id, hold.state, "finalize")),
            HoldState::Reserved => {
                if !self.has_other_completed(investment_id, hold.user_id) {
                    self.total_investors += 1;
                }
                self.set_state(investment_id, HoldState::Completed);
                Ok(true)
            }
        }
    }

    /// Takes a refunded amount out of the totals and drops the investor when
    /// this was their last completed investment here. A reservation that never
    /// finalized only gives back its amount. Returns `false` if already refunded.
    pub fn refund(&mut self, investment_id: InvestmentId) -> Result<bool, InvestmentError> {
        let hold = self.hold(investment_id)?;
        match hold.state {
            HoldState::Refunded => Ok(false),
            HoldState::Released => Err(self.cannot(investment_id, hold.state, "refund")),
            HoldState::Reserved | HoldState::Completed => {
                let total_invested = self.subtract(hold.amount, "refund")?;
                let total_investors =
                    if hold.state == HoldState::Completed && !self.has_other_completed(investment_id, hold.user_id) {
                        self.total_investors.checked_sub(1).ok_or_else(|| {
                            InvestmentError::InvariantViolation(format!(
                                "refund would take investor count of location {} below zero",
                                self.location_id
                            ))
                        })?
                    } else {
                        self.total_investors
                    };
                self.total_invested = total_invested;
                self.total_investors = total_investors;
                self.set_state(investment_id, HoldState::Refunded);
                Ok(true)
            }
        }
    }

    /// Brings the hold for `investment_id` up to the ledger effect of
    /// `status`. Returns `true` when something changed.
    pub fn settle(&mut self, investment_id: InvestmentId, status: InvestmentStatus) -> Result<bool, InvestmentError> {
        match HoldState::for_status(status) {
            HoldState::Reserved => Ok(false),
            HoldState::Completed => self.finalize(investment_id),
            HoldState::Released => self.release(investment_id),
            HoldState::Refunded => self.refund(investment_id),
        }
    }

    /// Moves holds forward to what the investment records say and recounts
    /// the totals from the holds. Holds with no matching record are kept:
    /// they belong to submissions that have reserved but not yet stored
    /// their investment.
    pub fn reconcile<'a>(&mut self, investments: impl IntoIterator<Item = &'a Investment>) {
        for investment in investments {
            if investment.location_id != self.location_id {
                continue;
            }
            let state = HoldState::for_status(investment.status);
            match self.holds.get_mut(&investment.id) {
                Some(hold) if hold.state.stage() >= state.stage() => {}
                Some(hold) => hold.state = state,
                None => {
                    self.holds.insert(
                        investment.id,
                        Hold {
                            user_id: investment.user_id,
                            amount: investment.amount,
                            state,
                        },
                    );
                }
            }
        }

        self.total_invested = self
            .holds
            .values()
            .filter(|hold| hold.state.holds_capacity())
            .fold(Money::ZERO, |total, hold| total + hold.amount.into());
        self.total_investors = self
            .holds
            .values()
            .filter(|hold| hold.state == HoldState::Completed)
            .map(|hold| hold.user_id)
            .collect::<BTreeSet<_>>()
            .len() as u32;
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            location_id: self.location_id,
            total_invested: self.total_invested,
            total_investors: self.total_investors,
            investment_limit: self.investment_limit,
            remaining: self.investment_limit.saturating_sub(self.total_invested),
        }
    }

    fn hold(&self, investment_id: InvestmentId) -> Result<Hold, InvestmentError> {
        self.holds.get(&investment_id).copied().ok_or_else(|| {
            InvestmentError::InvariantViolation(format!(
                "investment {investment_id} holds no reservation at location {}",
                self.location_id
            ))
        })
    }

    fn has_other_completed(&self, investment_id: InvestmentId, user_id: UserId) -> bool {
        self.holds
            .iter()
            .any(|(id, hold)| *id != investment_id && hold.user_id == user_id && hold.state == HoldState::Completed)
    }

    fn subtract(&self, amount: Amount, action: &str) -> Result<Money, InvestmentError> {
        self.total_invested.checked_sub(amount.into()).ok_or_else(|| {
            InvestmentError::InvariantViolation(format!(
                "{action} of {} would take location {} below zero (total {})",
                amount, self.location_id, self.total_invested
            ))
        })
    }

    fn set_state(&mut self, investment_id: InvestmentId, state: HoldState) {
        if let Some(hold) = self.holds.get_mut(&investment_id) {
            hold.state = state;
        }
        self.updated_at = Utc::now();
    }

    fn cannot(&self, investment_id: InvestmentId, state: HoldState, action: &str) -> InvestmentError {
        InvestmentError::InvariantViolation(format!(
            "cannot {action} investment {investment_id} at location {}: hold is {state:?}",
            self.location_id
        ))
    }
}

impl LedgerSnapshot {
    /// Projection for a location nobody has tried to invest in yet.
    pub fn empty(location: &Location) -> Self {
        Self {
            location_id: location.id,
            total_invested: Money::ZERO,
            total_investors: 0,
            investment_limit: location.investment_limit,
            remaining: location.investment_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn location(limit: rust_decimal::Decimal) -> Location {
        Location::new(1, "Downtown", Money::new(limit))
    }

    fn amount(value: rust_decimal::Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    fn reserved(ledger: &mut CapacityLedger, loc: &Location, user: UserId, value: rust_decimal::Decimal) -> InvestmentId {
        let id = Uuid::new_v4();
        ledger.reserve(loc, id, user, amount(value)).unwrap();
        id
    }

    #[test]
    fn test_reserve_rejects_over_cap_without_change() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        reserved(&mut ledger, &loc, 1, dec!(950));

        let result = ledger.reserve(&loc, Uuid::new_v4(), 2, amount(dec!(100)));
        assert!(matches!(
            result,
            Err(ValidationError::CapacityExceeded { remaining, .. }) if remaining == dec!(50)
        ));
        assert_eq!(ledger.total_invested, Money::new(dec!(950)));
        assert_eq!(ledger.holds.len(), 1);
    }

    #[test]
    fn test_reserve_up_to_exact_limit() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        reserved(&mut ledger, &loc, 1, dec!(900));

        reserved(&mut ledger, &loc, 2, dec!(100));
        assert_eq!(ledger.total_invested, Money::new(dec!(1000)));
        assert!(ledger.reserve(&loc, Uuid::new_v4(), 3, amount(dec!(1))).is_err());
    }

    #[test]
    fn test_reserve_same_investment_twice_counts_once() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        let id = reserved(&mut ledger, &loc, 1, dec!(300));
        ledger.reserve(&loc, id, 1, amount(dec!(300))).unwrap();
        assert_eq!(ledger.total_invested, Money::new(dec!(300)));
    }

    #[test]
    fn test_reserve_closed_location() {
        let loc = location(dec!(1000)).closed();
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        assert_eq!(
            ledger.reserve(&loc, Uuid::new_v4(), 1, amount(dec!(10))),
            Err(ValidationError::LocationClosed(1))
        );
    }

    #[test]
    fn test_reserve_refreshes_limit_snapshot() {
        let mut ledger = CapacityLedger::new(1, Money::new(dec!(100)));
        reserved(&mut ledger, &location(dec!(500)), 1, dec!(300));
        assert_eq!(ledger.investment_limit, Money::new(dec!(500)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        let id = reserved(&mut ledger, &loc, 1, dec!(400));

        assert!(ledger.release(id).unwrap());
        assert!(!ledger.release(id).unwrap());
        assert_eq!(ledger.total_invested, Money::ZERO);
    }

    #[test]
    fn test_release_unknown_or_completed_is_invariant_violation() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        assert!(matches!(
            ledger.release(Uuid::new_v4()),
            Err(InvestmentError::InvariantViolation(_))
        ));

        let id = reserved(&mut ledger, &loc, 1, dec!(100));
        ledger.finalize(id).unwrap();
        assert!(matches!(ledger.release(id), Err(InvestmentError::InvariantViolation(_))));
        assert_eq!(ledger.total_invested, Money::new(dec!(100)));
    }

    #[test]
    fn test_release_underflow_is_invariant_violation() {
        let loc = location(dec!(100));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        let id = reserved(&mut ledger, &loc, 1, dec!(10));
        ledger.total_invested = Money::new(dec!(5));
        assert!(matches!(ledger.release(id), Err(InvestmentError::InvariantViolation(_))));
        assert_eq!(ledger.total_invested, Money::new(dec!(5)));
        assert_eq!(ledger.holds[&id].state, HoldState::Reserved);
    }

    #[test]
    fn test_finalize_and_refund_investor_count() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        let first = reserved(&mut ledger, &loc, 7, dec!(300));
        let second = reserved(&mut ledger, &loc, 7, dec!(200));

        assert!(ledger.finalize(first).unwrap());
        assert!(ledger.finalize(second).unwrap());
        assert!(!ledger.finalize(second).unwrap());
        assert_eq!(ledger.total_investors, 1);

        ledger.refund(first).unwrap();
        assert_eq!(ledger.total_invested, Money::new(dec!(200)));
        assert_eq!(ledger.total_investors, 1);

        ledger.refund(second).unwrap();
        assert!(!ledger.refund(second).unwrap());
        assert_eq!(ledger.total_invested, Money::ZERO);
        assert_eq!(ledger.total_investors, 0);
    }

    #[test]
    fn test_settle_catches_up_a_skipped_completion() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        let id = reserved(&mut ledger, &loc, 7, dec!(300));

        assert!(!ledger.settle(id, InvestmentStatus::Processing).unwrap());
        assert!(ledger.settle(id, InvestmentStatus::Refunded).unwrap());
        assert_eq!(ledger.total_invested, Money::ZERO);
        assert_eq!(ledger.total_investors, 0);
    }

    #[test]
    fn test_reconcile_keeps_unrecorded_holds_and_moves_forward_only() {
        let loc = location(dec!(1000));
        let mut ledger = CapacityLedger::new(1, loc.investment_limit);
        let in_flight = reserved(&mut ledger, &loc, 1, dec!(400));

        let mut completed = Investment::new(2, 1, amount(dec!(500)), "usd", None, Utc::now());
        completed.status = InvestmentStatus::Completed;
        ledger.reserve(&loc, completed.id, 2, completed.amount).unwrap();
        ledger.finalize(completed.id).unwrap();

        let mut stale = completed.clone();
        stale.status = InvestmentStatus::Processing;
        ledger.total_invested = Money::new(dec!(5));
        ledger.total_investors = 9;

        ledger.reconcile([&stale]);
        assert_eq!(ledger.total_invested, Money::new(dec!(900)));
        assert_eq!(ledger.total_investors, 1);
        assert_eq!(ledger.holds[&in_flight].state, HoldState::Reserved);
        assert_eq!(ledger.holds[&completed.id].state, HoldState::Completed);
    }

    #[test]
    fn test_snapshot_remaining_never_negative() {
        let mut ledger = CapacityLedger::new(1, Money::new(dec!(100)));
        ledger.total_invested = Money::new(dec!(150));
        assert_eq!(ledger.snapshot().remaining, Money::ZERO);
    }
}
