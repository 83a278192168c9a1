use super::ledger::CapacityLedgerService;
use crate::config::InvestmentLimits;
use crate::domain::investment::{FailureReason, Investment, InvestmentStatus, Transition, UserId};
use crate::domain::location::LocationId;
use crate::domain::money::Amount;
use crate::domain::ports::{
    InvestmentStoreHandle, LocationDirectoryHandle, PaymentGatewayHandle, PaymentIntent,
};
use crate::error::{InvestmentError, Result, ValidationError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvestmentRequest {
    pub user_id: UserId,
    pub location_id: LocationId,
    pub amount: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub investment: Investment,
    pub payment_intent: PaymentIntent,
}

/// Admits investment requests.
///
/// Validates the request, reserves capacity, records the pending investment
/// and opens a gateway intent. Reservation and intent creation are separate
/// steps: when anything after a successful reservation fails, the
/// reservation is released before the error is returned.
pub struct InvestmentValidator {
    limits: InvestmentLimits,
    locations: LocationDirectoryHandle,
    ledger: Arc<CapacityLedgerService>,
    investments: InvestmentStoreHandle,
    gateway: PaymentGatewayHandle,
}

impl InvestmentValidator {
    pub fn new(
        limits: InvestmentLimits,
        locations: LocationDirectoryHandle,
        ledger: Arc<CapacityLedgerService>,
        investments: InvestmentStoreHandle,
        gateway: PaymentGatewayHandle,
    ) -> Self {
        Self {
            limits,
            locations,
            ledger,
            investments,
            gateway,
        }
    }

    pub async fn submit(&self, request: InvestmentRequest) -> Result<Submission> {
        let amount = self.validate_amount(request.amount)?;
        if self.locations.get(request.location_id).await?.is_none() {
            return Err(ValidationError::UnknownLocation(request.location_id).into());
        }

        let investment = Investment::new(
            request.user_id,
            request.location_id,
            amount,
            self.limits.currency.clone(),
            request.notes,
            Utc::now(),
        );
        self.ledger.reserve(&investment).await?;

        if let Err(e) = self.investments.insert(investment.clone()).await {
            self.compensate(&investment).await;
            return Err(e);
        }

        let intent = match self.gateway.create_intent(&investment).await {
            Ok(intent) => intent,
            Err(gateway_error) => {
                warn!(
                    reference = %investment.reference,
                    error = %gateway_error,
                    "intent creation failed, releasing reservation"
                );
                self.fail_intent_creation(&investment).await?;
                return Err(gateway_error.into());
            }
        };

        let processing = investment.apply(
            Transition::IntentCreated {
                external_payment_id: intent.id.clone(),
            },
            Utc::now(),
        )?;
        let investment = if self
            .investments
            .compare_and_swap(InvestmentStatus::Pending, processing.clone())
            .await?
        {
            processing
        } else {
            // A sweep or an early event already moved it; report what is stored.
            self.investments
                .get(investment.id)
                .await?
                .ok_or_else(|| InvestmentError::NotFound(investment.reference.clone()))?
        };

        info!(
            reference = %investment.reference,
            location_id = investment.location_id,
            amount = %investment.amount,
            payment_intent = %intent.id,
            "investment submitted"
        );
        Ok(Submission {
            investment,
            payment_intent: intent,
        })
    }

    fn validate_amount(&self, value: Decimal) -> Result<Amount> {
        let amount = Amount::new(value)?;
        if value < self.limits.min_amount || value > self.limits.max_amount {
            return Err(ValidationError::AmountOutOfBounds {
                amount: value,
                min: self.limits.min_amount,
                max: self.limits.max_amount,
            }
            .into());
        }
        if value.normalize().scale() > 2 {
            return Err(ValidationError::AmountPrecision(value).into());
        }
        Ok(amount)
    }

    async fn fail_intent_creation(&self, investment: &Investment) -> Result<()> {
        let failed = investment.apply(
            Transition::Failed(FailureReason::IntentCreationFailed),
            Utc::now(),
        )?;
        if self
            .investments
            .compare_and_swap(InvestmentStatus::Pending, failed.clone())
            .await?
        {
            self.ledger.settle(&failed).await?;
        }
        Ok(())
    }

    async fn compensate(&self, investment: &Investment) {
        if let Err(e) = self
            .ledger
            .release(investment.location_id, investment.id)
            .await
        {
            error!(
                location_id = investment.location_id,
                investment_id = %investment.id,
                error = %e,
                "could not release reservation after failed insert"
            );
        }
    }
}
