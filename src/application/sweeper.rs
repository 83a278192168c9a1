use super::reconciliation::ReconciliationProcessor;
use crate::error::{InvestmentError, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Spawns the periodic expiry sweep. The first sweep runs one full `every`
/// after spawning. The task runs until `shutdown` flips to `true` or its
/// sender is dropped.
pub fn spawn_expiry_sweeper(
    processor: Arc<ReconciliationProcessor>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    if every.is_zero() {
        return Err(InvestmentError::Config("sweep interval must be non-zero".into()));
    }
    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match processor.sweep_expired(Utc::now()).await {
                        Ok(report) if report.expired > 0 => {
                            info!(expired = report.expired, examined = report.examined, "expiry sweep released capacity");
                        }
                        Ok(report) => debug!(examined = report.examined, "expiry sweep found nothing"),
                        Err(e) => error!(error = %e, "expiry sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("expiry sweeper stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ledger::CapacityLedgerService;
    use crate::application::submission::{InvestmentRequest, InvestmentValidator};
    use crate::config::{EngineConfig, InvestmentLimits};
    use crate::domain::investment::InvestmentStatus;
    use crate::domain::location::Location;
    use crate::domain::money::Money;
    use crate::domain::ports::InvestmentStore;
    use crate::infrastructure::gateway::SimulatedGateway;
    use crate::infrastructure::in_memory::{
        InMemoryInvestmentStore, InMemoryLedgerStore, InMemoryLocationDirectory, InMemoryNotifier,
    };
    use rust_decimal_macros::dec;

    fn processor() -> Arc<ReconciliationProcessor> {
        let locations = Arc::new(InMemoryLocationDirectory::new());
        let investments = Arc::new(InMemoryInvestmentStore::new());
        let ledger = Arc::new(CapacityLedgerService::new(
            Arc::new(InMemoryLedgerStore::new()),
            locations,
            investments.clone(),
        ));
        Arc::new(ReconciliationProcessor::new(
            investments.clone(),
            investments,
            ledger,
            Arc::new(SimulatedGateway::new()),
            Arc::new(InMemoryNotifier::new()),
            chrono::Duration::zero(),
        ))
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let (_tx, rx) = watch::channel(false);
        assert!(matches!(
            spawn_expiry_sweeper(processor(), Duration::ZERO, rx),
            Err(InvestmentError::Config(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_follows_configured_interval() {
        let config = EngineConfig {
            sweep_interval_secs: 1,
            ..EngineConfig::default()
        };
        let (tx, rx) = watch::channel(false);
        let handle = spawn_expiry_sweeper(processor(), config.sweep_interval(), rx).unwrap();

        tokio::time::sleep(config.sweep_interval() * 3).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_expires_and_stops() {
        let locations = Arc::new(InMemoryLocationDirectory::from_locations([Location::new(
            1,
            "Harbour",
            Money::new(dec!(1000)),
        )]));
        let investments = Arc::new(InMemoryInvestmentStore::new());
        let ledger = Arc::new(CapacityLedgerService::new(
            Arc::new(InMemoryLedgerStore::new()),
            locations.clone(),
            investments.clone(),
        ));
        let gateway = Arc::new(SimulatedGateway::new());
        let validator = InvestmentValidator::new(
            InvestmentLimits::default(),
            locations,
            ledger.clone(),
            investments.clone(),
            gateway.clone(),
        );
        let processor = Arc::new(ReconciliationProcessor::new(
            investments.clone(),
            investments.clone(),
            ledger.clone(),
            gateway,
            Arc::new(InMemoryNotifier::new()),
            chrono::Duration::zero(),
        ));

        let submission = validator
            .submit(InvestmentRequest {
                user_id: 1,
                location_id: 1,
                amount: dec!(100),
                notes: None,
            })
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = spawn_expiry_sweeper(processor, Duration::from_millis(10), rx).unwrap();

        let mut status = InvestmentStatus::Processing;
        for _ in 0..100 {
            status = investments
                .get(submission.investment.id)
                .await
                .unwrap()
                .unwrap()
                .status;
            if status == InvestmentStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, InvestmentStatus::Failed);
        assert_eq!(ledger.snapshot(1).await.unwrap().total_invested, Money::ZERO);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
