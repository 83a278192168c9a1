//! Drives the engine from recorded operations, one CSV row at a time.
//!
//! Client-facing rows (`invest`, `confirm`) and gateway rows (`succeeded`,
//! `payment_failed`, `canceled`, `dispute`) go through [`InvestmentApi`]
//! exactly as live traffic would; gateway rows are wrapped in an event
//! envelope and signed with the configured webhook secret first. Operator rows
//! (`refund`, `sweep`, `audit`) call the services directly.

use super::api::{ApiResponse, InvestmentApi};
use super::csv::command_reader::{OperationKind, OperationRecord};
use super::webhook::WebhookVerifier;
use crate::application::ledger::CapacityLedgerService;
use crate::application::reconciliation::ReconciliationProcessor;
use crate::domain::event::EventKind;
use crate::domain::ports::InvestmentStoreHandle;
use crate::error::{InvestmentError, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Replayer {
    api: InvestmentApi,
    signer: WebhookVerifier,
    processor: Arc<ReconciliationProcessor>,
    ledger: Arc<CapacityLedgerService>,
    investments: InvestmentStoreHandle,
}

impl Replayer {
    pub fn new(
        api: InvestmentApi,
        signer: WebhookVerifier,
        processor: Arc<ReconciliationProcessor>,
        ledger: Arc<CapacityLedgerService>,
        investments: InvestmentStoreHandle,
    ) -> Self {
        Self {
            api,
            signer,
            processor,
            ledger,
            investments,
        }
    }

    /// Applies one row. `row` numbers generated event ids when the row has none.
    pub async fn apply(&self, row: usize, record: OperationRecord) -> Result<()> {
        match record.op {
            OperationKind::Invest => {
                let user = required(record.user, "user")?;
                let body = json!({
                    "location_id": required(record.location, "location")?,
                    "amount": required(record.amount, "amount")?,
                });
                expect_success(self.api.create_investment(user, &body.to_string()).await)
            }
            OperationKind::Confirm => {
                let body = json!({ "payment_intent_id": required(record.payment_id, "payment_id")? });
                expect_success(self.api.confirm(&body.to_string()).await)
            }
            OperationKind::Succeeded => self.deliver(row, EventKind::Succeeded, record).await,
            OperationKind::PaymentFailed => self.deliver(row, EventKind::PaymentFailed, record).await,
            OperationKind::Canceled => self.deliver(row, EventKind::Canceled, record).await,
            OperationKind::Dispute => self.deliver(row, EventKind::DisputeCreated, record).await,
            OperationKind::Refund => {
                let payment_id = required(record.payment_id, "payment_id")?;
                let investment = self
                    .investments
                    .find_by_payment_id(&payment_id)
                    .await?
                    .ok_or_else(|| InvestmentError::NotFound(payment_id.clone()))?;
                self.processor.refund(investment.id).await?;
                Ok(())
            }
            OperationKind::Sweep => {
                let report = self.processor.sweep_expired(Utc::now()).await?;
                info!(examined = report.examined, expired = report.expired, "sweep replayed");
                Ok(())
            }
            OperationKind::Audit => {
                let location = required(record.location, "location")?;
                let report = self.ledger.audit_recompute(location).await?;
                if report.drifted {
                    warn!(location, "audit corrected ledger drift");
                }
                Ok(())
            }
        }
    }

    async fn deliver(&self, row: usize, kind: EventKind, record: OperationRecord) -> Result<()> {
        let payment_id = required(record.payment_id, "payment_id")?;
        let event_id = record.event_id.unwrap_or_else(|| format!("evt_{row}"));
        let object = match kind {
            EventKind::DisputeCreated => json!({ "id": format!("dp_{row}"), "payment_intent": payment_id }),
            _ => json!({ "id": payment_id }),
        };
        let payload = json!({
            "id": event_id,
            "type": kind.as_str(),
            "data": { "object": object },
        })
        .to_string();

        let signature = self.signer.sign(&payload, Utc::now().timestamp())?;
        expect_success(self.api.payment_webhook(&payload, Some(&signature)).await)
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T> {
    value.ok_or_else(|| InvestmentError::InternalError(format!("missing `{column}` column").into()))
}

fn expect_success(response: ApiResponse) -> Result<()> {
    if (200..300).contains(&response.status) {
        return Ok(());
    }
    Err(InvestmentError::InternalError(
        format!("request rejected with {}: {}", response.status, response.body).into(),
    ))
}
