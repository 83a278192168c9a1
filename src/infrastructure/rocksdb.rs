use crate::domain::event::WebhookReceipt;
use crate::domain::investment::{Investment, InvestmentId, InvestmentStatus};
use crate::domain::ledger::CapacityLedger;
use crate::domain::location::LocationId;
use crate::domain::ports::{InvestmentStore, LedgerMutation, LedgerStore, ReceiptStore};
use crate::error::{InvestmentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, ErrorKind, IteratorMode, OptimisticTransactionDB,
    Options, Transaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Column Family for capacity ledger rows, keyed by big-endian location id.
pub const CF_LEDGERS: &str = "ledgers";
/// Column Family for investments, keyed by investment uuid bytes.
pub const CF_INVESTMENTS: &str = "investments";
/// Column Family mapping gateway payment ids to investment uuids.
pub const CF_PAYMENT_INDEX: &str = "payment_index";
/// Column Family for webhook receipts, keyed by external event id.
pub const CF_RECEIPTS: &str = "receipts";

/// Commit attempts before an optimistic transaction gives up on contention.
const MAX_COMMIT_ATTEMPTS: usize = 16;

type Txn<'a> = Transaction<'a, OptimisticTransactionDB>;

/// A persistent store implementation using RocksDB.
///
/// Every read-modify-write runs in an optimistic transaction: rows are read
/// with `get_for_update`, and a conflicting commit from another writer makes
/// the whole closure run again against fresh data.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<OptimisticTransactionDB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// column families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_LEDGERS, CF_INVESTMENTS, CF_PAYMENT_INDEX, CF_RECEIPTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = OptimisticTransactionDB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            InvestmentError::InternalError(Box::new(std::io::Error::other(format!(
                "{name} column family not found"
            ))))
        })
    }

    fn in_transaction<T>(&self, body: impl Fn(&Txn<'_>) -> Result<T>) -> Result<T> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let txn = self.db.transaction();
            let value = body(&txn)?;
            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(e) if matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain) => {
                    debug!(attempt, "optimistic transaction conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(InvestmentError::InternalError(Box::new(std::io::Error::other(
            "optimistic transaction kept conflicting",
        ))))
    }

    /// Points `investment`'s payment id at it, refusing to move an id that
    /// already belongs to another investment.
    fn index_payment(&self, txn: &Txn<'_>, investment: &Investment) -> Result<()> {
        let Some(payment_id) = &investment.external_payment_id else {
            return Ok(());
        };
        let index = self.cf(CF_PAYMENT_INDEX)?;
        match txn.get_for_update_cf(index, payment_id.as_bytes(), true)? {
            Some(owner) if owner.as_slice() != investment.id.as_bytes() => {
                return Err(InvestmentError::InvariantViolation(format!(
                    "payment {payment_id} already belongs to another investment"
                )));
            }
            _ => {}
        }
        txn.put_cf(index, payment_id.as_bytes(), investment.id.as_bytes())?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        InvestmentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Serialization error: {}", e),
        )))
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        InvestmentError::InternalError(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Deserialization error: {}", e),
        )))
    })
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn get(&self, location_id: LocationId) -> Result<Option<CapacityLedger>> {
        let cf = self.cf(CF_LEDGERS)?;
        match self.db.get_cf(cf, location_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        location_id: LocationId,
        seed: Option<CapacityLedger>,
        mutation: LedgerMutation<'_>,
    ) -> Result<CapacityLedger> {
        let key = location_id.to_be_bytes();
        self.in_transaction(|txn| {
            let cf = self.cf(CF_LEDGERS)?;
            let mut ledger = match txn.get_for_update_cf(cf, key, true)? {
                Some(bytes) => decode::<CapacityLedger>(&bytes)?,
                None => seed
                    .clone()
                    .ok_or(InvestmentError::UnknownLedger(location_id))?,
            };
            mutation(&mut ledger)?;
            txn.put_cf(cf, key, encode(&ledger)?)?;
            Ok(ledger)
        })
    }

    async fn get_all(&self) -> Result<Vec<CapacityLedger>> {
        self.scan(CF_LEDGERS)
    }
}

#[async_trait]
impl InvestmentStore for RocksDBStore {
    async fn insert(&self, investment: Investment) -> Result<()> {
        let value = encode(&investment)?;
        self.in_transaction(|txn| {
            self.index_payment(txn, &investment)?;
            txn.put_cf(self.cf(CF_INVESTMENTS)?, investment.id.as_bytes(), &value)?;
            Ok(())
        })
    }

    async fn get(&self, id: InvestmentId) -> Result<Option<Investment>> {
        let cf = self.cf(CF_INVESTMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn find_by_payment_id(&self, external_payment_id: &str) -> Result<Option<Investment>> {
        let index = self.cf(CF_PAYMENT_INDEX)?;
        let Some(id_bytes) = self.db.get_cf(index, external_payment_id.as_bytes())? else {
            return Ok(None);
        };
        let cf = self.cf(CF_INVESTMENTS)?;
        match self.db.get_cf(cf, &id_bytes)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_by_location(&self, location_id: LocationId) -> Result<Vec<Investment>> {
        Ok(self
            .scan::<Investment>(CF_INVESTMENTS)?
            .into_iter()
            .filter(|investment| investment.location_id == location_id)
            .collect())
    }

    async fn list_by_status(&self, statuses: &[InvestmentStatus]) -> Result<Vec<Investment>> {
        Ok(self
            .scan::<Investment>(CF_INVESTMENTS)?
            .into_iter()
            .filter(|investment| statuses.contains(&investment.status))
            .collect())
    }

    async fn compare_and_swap(&self, expected: InvestmentStatus, next: Investment) -> Result<bool> {
        let value = encode(&next)?;
        self.in_transaction(|txn| {
            let investments = self.cf(CF_INVESTMENTS)?;
            let current: Investment = match txn.get_for_update_cf(investments, next.id.as_bytes(), true)? {
                Some(bytes) => decode(&bytes)?,
                None => return Err(InvestmentError::NotFound(next.reference.clone())),
            };
            if current.status != expected {
                return Ok(false);
            }
            self.index_payment(txn, &next)?;
            txn.put_cf(investments, next.id.as_bytes(), &value)?;
            Ok(true)
        })
    }
}

#[async_trait]
impl ReceiptStore for RocksDBStore {
    async fn claim(
        &self,
        external_event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> Result<WebhookReceipt> {
        self.in_transaction(|txn| {
            let cf = self.cf(CF_RECEIPTS)?;
            if let Some(bytes) = txn.get_for_update_cf(cf, external_event_id.as_bytes(), true)? {
                return decode(&bytes);
            }
            let receipt = WebhookReceipt::new(external_event_id, event_type, received_at);
            txn.put_cf(cf, external_event_id.as_bytes(), encode(&receipt)?)?;
            Ok(receipt)
        })
    }

    async fn mark_applied(&self, external_event_id: &str) -> Result<()> {
        self.in_transaction(|txn| {
            let cf = self.cf(CF_RECEIPTS)?;
            if let Some(bytes) = txn.get_for_update_cf(cf, external_event_id.as_bytes(), true)? {
                let mut receipt: WebhookReceipt = decode(&bytes)?;
                receipt.applied = true;
                txn.put_cf(cf, external_event_id.as_bytes(), encode(&receipt)?)?;
            }
            Ok(())
        })
    }
}
