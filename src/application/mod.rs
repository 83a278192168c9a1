//! Application layer containing the use-case orchestration.
//!
//! `InvestmentValidator` admits new investments, `ReconciliationProcessor`
//! applies gateway outcomes, and both go through `CapacityLedgerService` for
//! every capacity change. Services share their ports through `Arc` so they can
//! be driven concurrently from request handlers and the background sweeper.

pub mod ledger;
pub mod reconciliation;
pub mod submission;
pub mod sweeper;
