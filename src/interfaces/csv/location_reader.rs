use crate::domain::location::{Location, LocationId};
use crate::domain::money::Money;
use crate::error::{InvestmentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct LocationRow {
    id: LocationId,
    name: String,
    open: bool,
    limit: Decimal,
}

impl From<LocationRow> for Location {
    fn from(row: LocationRow) -> Self {
        Location {
            id: row.id,
            name: row.name,
            is_open_for_investment: row.open,
            investment_limit: Money::new(row.limit),
        }
    }
}

/// Loads the location directory from CSV with the header `id,name,open,limit`.
pub fn read_locations<R: Read>(source: R) -> Result<Vec<Location>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source)
        .into_deserialize::<LocationRow>()
        .map(|row| row.map(Location::from).map_err(InvestmentError::from))
        .collect()
}
