use super::location::LocationId;
use super::money::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type InvestmentId = Uuid;
pub type UserId = u32;

/// Lifecycle of an investment.
///
/// `pending -> processing -> completed | failed`, and `completed -> refunded`
/// through the explicit refund operation. `completed`, `failed` and `refunded`
/// absorb every gateway event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

impl InvestmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    IntentCreationFailed,
    PaymentFailed,
    Canceled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    IntentCreated { external_payment_id: String },
    Succeeded,
    Failed(FailureReason),
    Refunded,
}

impl Transition {
    pub fn target(&self) -> InvestmentStatus {
        match self {
            Self::IntentCreated { .. } => InvestmentStatus::Processing,
            Self::Succeeded => InvestmentStatus::Completed,
            Self::Failed(_) => InvestmentStatus::Failed,
            Self::Refunded => InvestmentStatus::Refunded,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("investment {reference} cannot move from {from} to {to}")]
pub struct IllegalTransition {
    pub reference: String,
    pub from: InvestmentStatus,
    pub to: InvestmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub user_id: UserId,
    pub location_id: LocationId,
    pub amount: Amount,
    pub currency: String,
    pub status: InvestmentStatus,
    pub reference: String,
    pub external_payment_id: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub notes: Option<String>,
    pub invested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investment {
    pub fn new(
        user_id: UserId,
        location_id: LocationId,
        amount: Amount,
        currency: impl Into<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            location_id,
            amount,
            currency: currency.into(),
            status: InvestmentStatus::Pending,
            reference: new_reference(),
            external_payment_id: None,
            failure_reason: None,
            notes,
            invested_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Guarded transition: returns the next version of this investment, or
    /// `IllegalTransition` when the edge does not exist from the current
    /// status. `self` is never modified.
    pub fn apply(&self, transition: Transition, now: DateTime<Utc>) -> Result<Self, IllegalTransition> {
        use InvestmentStatus::*;

        let target = transition.target();
        let legal = matches!(
            (self.status, target),
            (Pending, Processing)
                | (Pending | Processing, Completed)
                | (Pending | Processing, Failed)
                | (Completed, Refunded)
        );
        if !legal {
            return Err(IllegalTransition {
                reference: self.reference.clone(),
                from: self.status,
                to: target,
            });
        }

        let mut next = self.clone();
        next.status = target;
        next.updated_at = now;
        match transition {
            Transition::IntentCreated { external_payment_id } => {
                next.external_payment_id = Some(external_payment_id);
            }
            Transition::Succeeded => next.invested_at = Some(now),
            Transition::Failed(reason) => next.failure_reason = Some(reason),
            Transition::Refunded => {}
        }
        Ok(next)
    }
}

fn new_reference() -> String {
    format!("INV-{}", Uuid::new_v4().simple().to_string().to_uppercase())
}
