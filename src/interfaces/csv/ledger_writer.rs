use crate::domain::ledger::LedgerSnapshot;
use crate::error::Result;
use std::io::Write;

const HEADER: [&str; 5] = [
    "location",
    "total_invested",
    "total_investors",
    "investment_limit",
    "remaining",
];

/// Writes ledger snapshots as CSV, one row per location.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_snapshots(&mut self, snapshots: impl IntoIterator<Item = LedgerSnapshot>) -> Result<()> {
        self.writer.write_record(HEADER)?;
        for snapshot in snapshots {
            // normalize() drops trailing zeros: 100.00 -> 100
            self.writer.write_record([
                snapshot.location_id.to_string(),
                snapshot.total_invested.value().normalize().to_string(),
                snapshot.total_investors.to_string(),
                snapshot.investment_limit.value().normalize().to_string(),
                snapshot.remaining.value().normalize().to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
