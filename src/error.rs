use crate::domain::investment::IllegalTransition;
use crate::domain::location::LocationId;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InvestmentError>;

/// Business-rule rejections. Returned synchronously, nothing is persisted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("amount {amount} is outside the allowed range {min}..={max}")]
    AmountOutOfBounds {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },
    #[error("amount {0} has more than 2 decimal places")]
    AmountPrecision(Decimal),
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("location {0} does not exist")]
    UnknownLocation(LocationId),
    #[error("location {0} is not open for investment")]
    LocationClosed(LocationId),
    #[error("location {location_id} cannot take {requested}, only {remaining} left")]
    CapacityExceeded {
        location_id: LocationId,
        requested: Decimal,
        remaining: Decimal,
    },
}

impl ValidationError {
    /// Machine-readable reason surfaced to API callers.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AmountOutOfBounds { .. } => "amount_out_of_bounds",
            Self::AmountPrecision(_) => "amount_precision",
            Self::NonPositiveAmount => "non_positive_amount",
            Self::UnknownLocation(_) => "unknown_location",
            Self::LocationClosed(_) => "location_closed",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("payment gateway error: {0}")]
pub struct GatewayError(pub String);

#[derive(Error, Debug)]
pub enum InvestmentError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Invalid webhook signature: {0}")]
    Signature(String),
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Investment not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),
    #[error("No capacity ledger for location {0}")]
    UnknownLedger(LocationId),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}
