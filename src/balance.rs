//! Holder cash balances.
//!
//! A balance is the single shared mutable resource per holder. Every write bumps
//! `version`, which is what the open transition compares against its pre-read
//! snapshot. `locked` and `bonus` are carried for the surrounding application and
//! are never credited by settlement.

use crate::types::{HolderId, Quote, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub holder: HolderId,
    pub currency: String,
    pub available: Quote,
    pub locked: Quote,
    pub bonus: Quote,
    pub version: u64,
    pub updated_at: Timestamp,
}

impl Balance {
    pub fn new(holder: HolderId, currency: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            holder,
            currency: currency.into(),
            available: Quote::zero(),
            locked: Quote::zero(),
            bonus: Quote::zero(),
            version: 0,
            updated_at: timestamp,
        }
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            holder: self.holder,
            available: self.available,
            version: self.version,
        }
    }

    pub fn deposit(&mut self, amount: Quote, timestamp: Timestamp) {
        self.available = self.available.add(amount);
        self.touch(timestamp);
    }

    // commit cash to a position
    pub fn debit(&mut self, amount: Quote, timestamp: Timestamp) -> Result<(), BalanceError> {
        if amount.value() > self.available.value() {
            return Err(BalanceError::InsufficientFunds {
                requested: amount,
                available: self.available,
            });
        }
        self.available = self.available.sub(amount);
        self.touch(timestamp);
        Ok(())
    }

    // return investment +/- pnl on close. settlement caps losses so this is never negative.
    pub fn credit(&mut self, amount: Quote, timestamp: Timestamp) -> Result<(), BalanceError> {
        debug_assert!(!amount.is_negative(), "negative settlement credit");
        let available = self
            .available
            .value()
            .checked_add(amount.value())
            .ok_or(BalanceError::Overflow {
                amount,
                available: self.available,
            })?;
        self.available = Quote::new(available);
        self.touch(timestamp);
        Ok(())
    }

    fn touch(&mut self, timestamp: Timestamp) {
        self.version += 1;
        self.updated_at = timestamp;
    }
}

/// What a caller observed before deciding to debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub holder: HolderId,
    pub available: Quote,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Quote, available: Quote },

    #[error("Credit of {amount} onto {available} is out of range")]
    Overflow { amount: Quote, available: Quote },
}
