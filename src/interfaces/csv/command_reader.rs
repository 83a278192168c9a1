use crate::domain::investment::UserId;
use crate::domain::location::LocationId;
use crate::error::{InvestmentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Invest,
    Confirm,
    Succeeded,
    PaymentFailed,
    Canceled,
    Dispute,
    Refund,
    Sweep,
    Audit,
}

/// One replayed operation. Which columns are required depends on `op`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OperationRecord {
    pub op: OperationKind,
    pub user: Option<UserId>,
    pub location: Option<LocationId>,
    pub amount: Option<Decimal>,
    pub payment_id: Option<String>,
    pub event_id: Option<String>,
}

/// Reads replay operations from a CSV source with the header
/// `op,user,location,amount,payment_id,event_id`.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes operations, one per row.
    pub fn operations(self) -> impl Iterator<Item = Result<OperationRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(InvestmentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, user, location, amount, payment_id, event_id\n\
                    invest, 1, 10, 250.50, ,\n\
                    succeeded, , , , pi_1, evt_1\n\
                    sweep, , , , ,";
        let results: Vec<Result<OperationRecord>> =
            CommandReader::new(data.as_bytes()).operations().collect();

        assert_eq!(results.len(), 3);
        let invest = results[0].as_ref().unwrap();
        assert_eq!(invest.op, OperationKind::Invest);
        assert_eq!(invest.user, Some(1));
        assert_eq!(invest.amount, Some(dec!(250.50)));
        assert_eq!(invest.payment_id, None);

        let succeeded = results[1].as_ref().unwrap();
        assert_eq!(succeeded.payment_id.as_deref(), Some("pi_1"));
        assert_eq!(succeeded.event_id.as_deref(), Some("evt_1"));
        assert_eq!(results[2].as_ref().unwrap().op, OperationKind::Sweep);
    }

    #[test]
    fn test_reader_short_rows_are_accepted() {
        let data = "op, user, location, amount, payment_id, event_id\naudit, , 3";
        let record = CommandReader::new(data.as_bytes())
            .operations()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.op, OperationKind::Audit);
        assert_eq!(record.location, Some(3));
    }

    #[test]
    fn test_reader_unknown_operation() {
        let data = "op, user, location, amount, payment_id, event_id\nwithdraw, 1, 1, 1.0, ,";
        let results: Vec<Result<OperationRecord>> =
            CommandReader::new(data.as_bytes()).operations().collect();
        assert!(matches!(results[0], Err(InvestmentError::CsvError(_))));
    }
}
