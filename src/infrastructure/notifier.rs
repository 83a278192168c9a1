use crate::domain::ports::{Notification, Notifier};
use crate::error::Result;
use async_trait::async_trait;
use tracing::{error, info};

/// Emits notifications as structured log events. Operator alerts go out at
/// error level on the `operator_alert` target so they can be routed apart.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        match notification {
            Notification::InvestmentCompleted {
                reference,
                user_id,
                location_id,
                amount,
            } => info!(target: "notifications", %reference, user_id, location_id, %amount, "investment completed"),
            Notification::InvestmentRefunded {
                reference,
                user_id,
                location_id,
                amount,
            } => info!(target: "notifications", %reference, user_id, location_id, %amount, "investment refunded"),
            Notification::OperatorAlert { subject, detail } => {
                error!(target: "operator_alert", %subject, "{detail}")
            }
        }
        Ok(())
    }
}
