use super::ledger::CapacityLedgerService;
use crate::domain::event::{EventKind, PaymentEvent};
use crate::domain::investment::{
    FailureReason, Investment, InvestmentId, InvestmentStatus, Transition,
};
use crate::domain::ports::{
    IntentStatus, InvestmentStoreHandle, Notification, NotifierHandle, PaymentGatewayHandle,
    ReceiptStoreHandle,
};
use crate::error::{InvestmentError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upper bound on re-reads after losing a compare-and-swap race. Statuses only
/// move forward, so a handful of attempts covers every interleaving.
const MAX_TRANSITION_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Applied { status: InvestmentStatus },
    Duplicate,
    StaleIgnored { current: InvestmentStatus },
    UnknownPayment,
    DisputeRaised,
    Unhandled { event_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
}

/// Applies gateway outcomes to investments exactly once.
///
/// Webhook deliveries, client confirmations, the expiry sweep and refunds all
/// funnel into `transition`, which compare-and-swaps the investment's status
/// and only then touches the ledger. Ledger effects are journaled per
/// investment, so whoever observes the new status can land the effect and it
/// still counts once.
pub struct ReconciliationProcessor {
    investments: InvestmentStoreHandle,
    receipts: ReceiptStoreHandle,
    ledger: Arc<CapacityLedgerService>,
    gateway: PaymentGatewayHandle,
    notifier: NotifierHandle,
    confirmation_timeout: chrono::Duration,
}

impl ReconciliationProcessor {
    pub fn new(
        investments: InvestmentStoreHandle,
        receipts: ReceiptStoreHandle,
        ledger: Arc<CapacityLedgerService>,
        gateway: PaymentGatewayHandle,
        notifier: NotifierHandle,
        confirmation_timeout: chrono::Duration,
    ) -> Self {
        Self {
            investments,
            receipts,
            ledger,
            gateway,
            notifier,
            confirmation_timeout,
        }
    }

    pub async fn handle(&self, event: PaymentEvent) -> Result<ReconcileOutcome> {
        let event_id = event.external_event_id.as_str();
        let receipt = self
            .receipts
            .claim(event_id, event.kind.as_str(), Utc::now())
            .await?;
        if receipt.applied {
            debug!(event_id, "event already applied");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let transition = match &event.kind {
            EventKind::Succeeded => Transition::Succeeded,
            EventKind::PaymentFailed => Transition::Failed(FailureReason::PaymentFailed),
            EventKind::Canceled => Transition::Failed(FailureReason::Canceled),
            EventKind::DisputeCreated => {
                self.raise_dispute(&event).await?;
                self.receipts.mark_applied(event_id).await?;
                return Ok(ReconcileOutcome::DisputeRaised);
            }
            EventKind::Other(event_type) => {
                debug!(event_id, event_type, "ignoring unhandled event type");
                self.receipts.mark_applied(event_id).await?;
                return Ok(ReconcileOutcome::Unhandled {
                    event_type: event_type.clone(),
                });
            }
        };

        let Some(investment) = self
            .investments
            .find_by_payment_id(&event.payment_reference)
            .await?
        else {
            // Receipt stays unapplied so a redelivery can land once the
            // investment is known.
            warn!(
                event_id,
                payment_reference = %event.payment_reference,
                "event references an unknown payment"
            );
            return Ok(ReconcileOutcome::UnknownPayment);
        };

        // Marked only once the ledger effect has landed, so a delivery that
        // failed half way is retried in full on redelivery.
        let outcome = self.transition(investment, transition).await?;
        self.receipts.mark_applied(event_id).await?;
        Ok(outcome)
    }

    /// Fallback for delayed webhooks: asks the gateway for the intent's status
    /// and runs the same guarded transition.
    pub async fn confirm_payment(&self, external_payment_id: &str) -> Result<Investment> {
        let investment = self
            .investments
            .find_by_payment_id(external_payment_id)
            .await?
            .ok_or_else(|| InvestmentError::NotFound(external_payment_id.to_string()))?;
        if investment.status.is_terminal() {
            self.settle(&investment).await?;
            return Ok(investment);
        }

        let transition = match self.gateway.retrieve_intent(external_payment_id).await? {
            IntentStatus::Succeeded => Transition::Succeeded,
            IntentStatus::Failed => Transition::Failed(FailureReason::PaymentFailed),
            IntentStatus::Canceled => Transition::Failed(FailureReason::Canceled),
            IntentStatus::RequiresConfirmation | IntentStatus::Processing => {
                return Ok(investment);
            }
        };

        let id = investment.id;
        self.transition(investment, transition).await?;
        self.load(id).await
    }

    /// Explicit refund of a completed investment. The gateway refund is issued
    /// first; if it fails nothing changes here.
    pub async fn refund(&self, investment_id: InvestmentId) -> Result<Investment> {
        let investment = self.load(investment_id).await?;
        // Surface the illegal edge before calling out to the gateway.
        investment.apply(Transition::Refunded, Utc::now())?;

        if let Some(payment_id) = &investment.external_payment_id {
            self.gateway.refund(payment_id, investment.amount).await?;
        }
        match self.transition(investment, Transition::Refunded).await? {
            ReconcileOutcome::StaleIgnored { current } => Err(InvestmentError::IllegalTransition(
                crate::domain::investment::IllegalTransition {
                    reference: investment_id.to_string(),
                    from: current,
                    to: InvestmentStatus::Refunded,
                },
            )),
            _ => self.load(investment_id).await,
        }
    }

    /// Fails every pending/processing investment created more than the
    /// confirmation timeout before `now`, releasing its capacity.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - self.confirmation_timeout;
        let open = self
            .investments
            .list_by_status(&[InvestmentStatus::Pending, InvestmentStatus::Processing])
            .await?;

        let mut report = SweepReport {
            examined: open.len(),
            ..SweepReport::default()
        };
        for investment in open.into_iter().filter(|i| i.created_at < cutoff) {
            let reference = investment.reference.clone();
            let outcome = self
                .transition(investment, Transition::Failed(FailureReason::Expired))
                .await?;
            if matches!(outcome, ReconcileOutcome::Applied { .. }) {
                info!(%reference, "expired unconfirmed investment");
                report.expired += 1;
            }
        }
        Ok(report)
    }

    async fn load(&self, id: InvestmentId) -> Result<Investment> {
        self.investments
            .get(id)
            .await?
            .ok_or_else(|| InvestmentError::NotFound(id.to_string()))
    }

    /// The guarded transition shared by every path. A transition that is no
    /// longer legal still settles the ledger for the status that beat it, which
    /// finishes the work of an earlier caller that swapped the status and then
    /// failed before its ledger effect landed.
    async fn transition(&self, mut investment: Investment, transition: Transition) -> Result<ReconcileOutcome> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let next = match investment.apply(transition.clone(), Utc::now()) {
                Ok(next) => next,
                Err(illegal) => {
                    info!(
                        reference = %illegal.reference,
                        from = %illegal.from,
                        to = %illegal.to,
                        "stale transition ignored"
                    );
                    self.settle(&investment).await?;
                    return Ok(ReconcileOutcome::StaleIgnored {
                        current: investment.status,
                    });
                }
            };

            if self
                .investments
                .compare_and_swap(investment.status, next.clone())
                .await?
            {
                info!(
                    reference = %next.reference,
                    from = %investment.status,
                    to = %next.status,
                    "investment transitioned"
                );
                self.settle(&next).await?;
                return Ok(ReconcileOutcome::Applied {
                    status: next.status,
                });
            }
            investment = self.load(investment.id).await?;
        }

        Err(InvestmentError::InternalError(
            format!(
                "investment {} kept changing under transition to {}",
                investment.reference,
                transition.target()
            )
            .into(),
        ))
    }

    /// Lands the ledger effect of `investment`'s status. Notifications go out
    /// only from the call that actually changed the ledger.
    async fn settle(&self, investment: &Investment) -> Result<()> {
        if !self.ledger.settle(investment).await? {
            return Ok(());
        }
        let notification = match investment.status {
            InvestmentStatus::Completed => Notification::InvestmentCompleted {
                reference: investment.reference.clone(),
                user_id: investment.user_id,
                location_id: investment.location_id,
                amount: investment.amount,
            },
            InvestmentStatus::Refunded => Notification::InvestmentRefunded {
                reference: investment.reference.clone(),
                user_id: investment.user_id,
                location_id: investment.location_id,
                amount: investment.amount,
            },
            InvestmentStatus::Pending | InvestmentStatus::Processing | InvestmentStatus::Failed => {
                return Ok(());
            }
        };
        self.notify(notification).await;
        Ok(())
    }

    async fn raise_dispute(&self, event: &PaymentEvent) -> Result<()> {
        let investment = self
            .investments
            .find_by_payment_id(&event.payment_reference)
            .await?;
        let detail = match &investment {
            Some(investment) => format!(
                "dispute opened on {} ({} {}, status {})",
                investment.reference, investment.amount, investment.currency, investment.status
            ),
            None => format!("dispute opened on unknown payment {}", event.payment_reference),
        };
        error!(
            event_id = %event.external_event_id,
            payment_reference = %event.payment_reference,
            "{detail}"
        );
        self.notify(Notification::OperatorAlert {
            subject: "payment dispute".to_string(),
            detail,
        })
        .await;
        Ok(())
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(error = %e, "notification delivery failed");
        }
    }
}
