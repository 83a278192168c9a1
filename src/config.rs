use crate::error::{InvestmentError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Amount bounds applied by the request validator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InvestmentLimits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub currency: String,
}

impl Default for InvestmentLimits {
    fn default() -> Self {
        Self {
            min_amount: dec!(10),
            max_amount: dec!(10000),
            currency: "usd".to_string(),
        }
    }
}

/// Engine configuration. Every field has a default; a JSON file may override
/// any subset of them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: InvestmentLimits,
    /// Pending/processing investments older than this are expired by the sweep.
    pub confirmation_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: InvestmentLimits::default(),
            confirmation_timeout_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
            webhook_secret: String::new(),
            signature_tolerance_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(InvestmentError::Config("sweep_interval_secs must be at least 1".into()));
        }
        if self.limits.min_amount > self.limits.max_amount {
            return Err(InvestmentError::Config(format!(
                "min_amount {} exceeds max_amount {}",
                self.limits.min_amount, self.limits.max_amount
            )));
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.confirmation_timeout_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
