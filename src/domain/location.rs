use super::money::Money;
use serde::{Deserialize, Serialize};

pub type LocationId = u32;

/// A fundraising location as published by the location directory.
///
/// Read-only inside this crate: the directory owns it, the ledger only
/// snapshots `investment_limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub is_open_for_investment: bool,
    pub investment_limit: Money,
}

impl Location {
    pub fn new(id: LocationId, name: impl Into<String>, investment_limit: Money) -> Self {
        Self {
            id,
            name: name.into(),
            is_open_for_investment: true,
            investment_limit,
        }
    }

    pub fn closed(mut self) -> Self {
        self.is_open_for_investment = false;
        self
    }
}
