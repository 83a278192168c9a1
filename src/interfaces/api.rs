//! Request handling for the three inbound endpoints, independent of any HTTP
//! framework. Each handler returns the status code and JSON body the route
//! should answer with.
//!
//! - `POST /investments` -> [`InvestmentApi::create_investment`]
//! - `POST /investments/confirm` -> [`InvestmentApi::confirm`]
//! - `POST /webhooks/payment` -> [`InvestmentApi::payment_webhook`]

use super::webhook::{WebhookVerifier, parse_event};
use crate::application::reconciliation::{ReconcileOutcome, ReconciliationProcessor};
use crate::application::submission::{InvestmentRequest, InvestmentValidator};
use crate::domain::investment::UserId;
use crate::domain::location::LocationId;
use crate::error::{InvestmentError, ValidationError};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn reason(status: u16, reason: &str, message: impl ToString) -> Self {
        Self::new(status, json!({ "reason": reason, "message": message.to_string() }))
    }
}

#[derive(Deserialize)]
struct CreateInvestmentBody {
    location_id: LocationId,
    amount: Decimal,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmBody {
    payment_intent_id: String,
}

pub struct InvestmentApi {
    validator: Arc<InvestmentValidator>,
    processor: Arc<ReconciliationProcessor>,
    verifier: WebhookVerifier,
}

impl InvestmentApi {
    pub fn new(
        validator: Arc<InvestmentValidator>,
        processor: Arc<ReconciliationProcessor>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            validator,
            processor,
            verifier,
        }
    }

    /// `user_id` comes from the authenticated session, never from the body.
    pub async fn create_investment(&self, user_id: UserId, body: &str) -> ApiResponse {
        let body: CreateInvestmentBody = match serde_json::from_str(body) {
            Ok(body) => body,
            Err(e) => return ApiResponse::reason(400, "malformed_request", e),
        };
        let request = InvestmentRequest {
            user_id,
            location_id: body.location_id,
            amount: body.amount,
            notes: body.notes,
        };
        match self.validator.submit(request).await {
            Ok(submission) => ApiResponse::new(
                201,
                json!({
                    "investment": submission.investment,
                    "payment_intent": submission.payment_intent,
                }),
            ),
            Err(e) => error_response(e),
        }
    }

    pub async fn confirm(&self, body: &str) -> ApiResponse {
        let body: ConfirmBody = match serde_json::from_str(body) {
            Ok(body) => body,
            Err(e) => return ApiResponse::reason(400, "malformed_request", e),
        };
        match self.processor.confirm_payment(&body.payment_intent_id).await {
            Ok(investment) => ApiResponse::new(200, json!({ "investment": investment })),
            Err(e) => error_response(e),
        }
    }

    pub async fn payment_webhook(&self, payload: &str, signature: Option<&str>) -> ApiResponse {
        let Some(signature) = signature else {
            return ApiResponse::reason(400, "bad_signature", "missing signature header");
        };
        if let Err(e) = self.verifier.verify(payload, signature, Utc::now()) {
            return ApiResponse::reason(400, "bad_signature", e);
        }
        let event = match parse_event(payload) {
            Ok(event) => event,
            Err(e) => return ApiResponse::reason(400, "malformed_event", e),
        };

        match self.processor.handle(event).await {
            Ok(ReconcileOutcome::UnknownPayment) => {
                ApiResponse::reason(404, "unknown_payment", "no investment for this payment")
            }
            Ok(outcome) => ApiResponse::new(200, json!({ "received": true, "result": outcome })),
            Err(e) => {
                error!(error = %e, "webhook processing failed");
                ApiResponse::reason(500, "internal_error", "retry later")
            }
        }
    }
}

fn error_response(error: InvestmentError) -> ApiResponse {
    match &error {
        InvestmentError::Validation(validation) => {
            let status = match validation {
                ValidationError::UnknownLocation(_) => 404,
                ValidationError::LocationClosed(_) | ValidationError::CapacityExceeded { .. } => 409,
                _ => 400,
            };
            ApiResponse::reason(status, validation.reason(), validation)
        }
        InvestmentError::Gateway(e) => {
            warn!(error = %e, "gateway call failed");
            ApiResponse::reason(502, "payment_gateway_error", e)
        }
        InvestmentError::NotFound(_) => ApiResponse::reason(404, "not_found", &error),
        InvestmentError::IllegalTransition(_) => ApiResponse::reason(409, "illegal_transition", &error),
        _ => {
            error!(error = %error, "request failed");
            ApiResponse::reason(500, "internal_error", "internal error")
        }
    }
}
