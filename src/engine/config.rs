//! Engine configuration options.

use crate::config::ConfigError;
use crate::idempotency::GuardConfig;
use crate::types::AssetClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Full bid/ask spread as a fraction of mid, per asset class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadTable {
    pub crypto: Decimal,
    pub forex: Decimal,
    pub stock: Decimal,
    pub commodity: Decimal,
}

impl Default for SpreadTable {
    fn default() -> Self {
        Self {
            crypto: Decimal::new(1, 3),    // 0.1%
            forex: Decimal::new(2, 4),     // 0.02%
            stock: Decimal::new(5, 4),     // 0.05%
            commodity: Decimal::new(4, 4), // 0.04%
        }
    }
}

impl SpreadTable {
    pub fn for_class(&self, asset_class: AssetClass) -> Decimal {
        match asset_class {
            AssetClass::Crypto => self.crypto,
            AssetClass::Forex => self.forex,
            AssetClass::Stock => self.stock,
            AssetClass::Commodity => self.commodity,
        }
    }

    pub fn zero() -> Self {
        Self {
            crypto: Decimal::ZERO,
            forex: Decimal::ZERO,
            stock: Decimal::ZERO,
            commodity: Decimal::ZERO,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Settlement currency of every balance the engine touches.
    pub currency: String,
    /// Multiplier ceiling.
    pub max_multiplier: u32,
    pub spreads: SpreadTable,
    pub idempotency: GuardConfig,
    /// Extra full read-validate-write attempts after a ConcurrentUpdate.
    pub conflict_retries: u32,
    /// Upper bound on `list` page size.
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            max_multiplier: 1000,
            spreads: SpreadTable::default(),
            idempotency: GuardConfig::default(),
            conflict_retries: 2,
            max_page_size: 500,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "engine.currency",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_multiplier",
                reason: "must be at least 1".to_string(),
            });
        }
        // the bid side is mid * (1 - spread/2), so spread has to stay under 1 to keep it positive
        for (field, spread) in [
            ("engine.spreads.crypto", self.spreads.crypto),
            ("engine.spreads.forex", self.spreads.forex),
            ("engine.spreads.stock", self.spreads.stock),
            ("engine.spreads.commodity", self.spreads.commodity),
        ] {
            if spread < Decimal::ZERO || spread >= Decimal::ONE {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("spread {spread} outside [0, 1)"),
                });
            }
        }
        if self.idempotency.ttl_secs == 0 || self.idempotency.bucket_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.idempotency",
                reason: "ttl_secs and bucket_secs must be positive".to_string(),
            });
        }
        if self.max_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.max_page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
