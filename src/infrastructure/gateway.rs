use crate::domain::investment::Investment;
use crate::domain::money::Amount;
use crate::domain::ports::{IntentStatus, PaymentGateway, PaymentIntent};
use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Deterministic stand-in for the card processor.
///
/// Intent ids are `pi_1`, `pi_2`, ... in creation order. Every intent reports
/// `default_outcome` from `retrieve_intent` until a test `settle`s it.
#[derive(Clone)]
pub struct SimulatedGateway {
    next_id: Arc<AtomicU64>,
    failures_pending: Arc<AtomicUsize>,
    default_outcome: IntentStatus,
    intents: Arc<RwLock<HashMap<String, IntentStatus>>>,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::with_default_outcome(IntentStatus::RequiresConfirmation)
    }

    pub fn with_default_outcome(default_outcome: IntentStatus) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            failures_pending: Arc::new(AtomicUsize::new(0)),
            default_outcome,
            intents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers intents issued by an earlier run so ids keep counting from
    /// the highest one seen and those intents can still be retrieved.
    pub async fn resume<I, S>(&self, issued: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut intents = self.intents.write().await;
        for id in issued {
            let id = id.into();
            if let Some(n) = id.strip_prefix("pi_").and_then(|n| n.parse::<u64>().ok()) {
                self.next_id.fetch_max(n + 1, Ordering::SeqCst);
            }
            intents.entry(id).or_insert(self.default_outcome);
        }
    }

    /// Makes the next `count` intent creations fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    pub async fn settle(&self, external_payment_id: &str, status: IntentStatus) {
        self.intents
            .write()
            .await
            .insert(external_payment_id.to_string(), status);
    }

    fn take_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn create_intent(&self, investment: &Investment) -> Result<PaymentIntent, GatewayError> {
        if self.take_failure() {
            return Err(GatewayError(format!(
                "simulated outage creating intent for {}",
                investment.reference
            )));
        }
        let id = format!("pi_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let client_secret = format!("{id}_secret_{}", uuid::Uuid::new_v4().simple());
        self.intents
            .write()
            .await
            .insert(id.clone(), self.default_outcome);
        debug!(payment_intent = %id, reference = %investment.reference, "intent created");
        Ok(PaymentIntent { id, client_secret })
    }

    async fn retrieve_intent(&self, external_payment_id: &str) -> Result<IntentStatus, GatewayError> {
        self.intents
            .read()
            .await
            .get(external_payment_id)
            .copied()
            .ok_or_else(|| GatewayError(format!("no such payment intent {external_payment_id}")))
    }

    async fn refund(&self, external_payment_id: &str, amount: Amount) -> Result<(), GatewayError> {
        let mut intents = self.intents.write().await;
        match intents.get_mut(external_payment_id) {
            Some(status) if matches!(*status, IntentStatus::Failed | IntentStatus::Canceled) => {
                Err(GatewayError(format!(
                    "cannot refund {external_payment_id} in status {status:?}"
                )))
            }
            Some(status) => {
                debug!(payment_intent = external_payment_id, %amount, "refund issued");
                *status = IntentStatus::Canceled;
                Ok(())
            }
            None => Err(GatewayError(format!(
                "no such payment intent {external_payment_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn investment() -> Investment {
        Investment::new(1, 1, Amount::new(dec!(50)).unwrap(), "usd", None, Utc::now())
    }

    #[tokio::test]
    async fn test_sequential_intent_ids() {
        let gateway = SimulatedGateway::new();
        let first = gateway.create_intent(&investment()).await.unwrap();
        let second = gateway.create_intent(&investment()).await.unwrap();
        assert_eq!(first.id, "pi_1");
        assert_eq!(second.id, "pi_2");
        assert!(first.client_secret.starts_with("pi_1_secret_"));
    }

    #[tokio::test]
    async fn test_failure_injection_consumes_count() {
        let gateway = SimulatedGateway::new();
        gateway.fail_next(2);
        assert!(gateway.create_intent(&investment()).await.is_err());
        assert!(gateway.create_intent(&investment()).await.is_err());
        let intent = gateway.create_intent(&investment()).await.unwrap();
        assert_eq!(intent.id, "pi_1");
    }

    #[tokio::test]
    async fn test_resume_continues_after_issued_ids() {
        let gateway = SimulatedGateway::with_default_outcome(IntentStatus::Succeeded);
        gateway.resume(["pi_3", "pi_1", "legacy_ref"]).await;

        let intent = gateway.create_intent(&investment()).await.unwrap();
        assert_eq!(intent.id, "pi_4");
        assert_eq!(
            gateway.retrieve_intent("pi_1").await.unwrap(),
            IntentStatus::Succeeded
        );
        assert!(gateway.retrieve_intent("legacy_ref").await.is_ok());
    }

    #[tokio::test]
    async fn test_settle_and_retrieve() {
        let gateway = SimulatedGateway::new();
        let intent = gateway.create_intent(&investment()).await.unwrap();
        assert_eq!(
            gateway.retrieve_intent(&intent.id).await.unwrap(),
            IntentStatus::RequiresConfirmation
        );
        gateway.settle(&intent.id, IntentStatus::Succeeded).await;
        assert_eq!(
            gateway.retrieve_intent(&intent.id).await.unwrap(),
            IntentStatus::Succeeded
        );
        assert!(gateway.retrieve_intent("pi_404").await.is_err());
    }
}
