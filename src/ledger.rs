//! Balance ledger transitions.
//!
//! `LedgerStore` is the persistence seam. Each transition is one atomic unit:
//! open debits `available` and inserts the position together, close credits
//! `available` and writes the terminal fields together. Nothing above this module
//! can produce a debited balance without a position, or a credit without a
//! terminal status.
//!
//! The in-memory store runs every transition inside one mutex-guarded critical
//! section and validates everything before it mutates anything, which is the
//! serializable-transaction shape a SQL adapter would use.

use crate::balance::{Balance, BalanceError, BalanceSnapshot};
use crate::position::{Position, PositionStatus, Settlement};
use crate::types::{HolderId, PositionId, Price, Quote, Timestamp};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Balance for holder {0} changed since it was read")]
    ConcurrentUpdate(HolderId),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Quote, available: Quote },

    #[error("No balance for holder {0}")]
    BalanceNotFound(HolderId),

    #[error("Position {0} not found")]
    PositionNotFound(PositionId),

    #[error("Position {} already {}", .0.id, .0.status)]
    AlreadyClosed(Box<Position>),

    #[error("Idempotency key already used by position {}", .0.id)]
    DuplicateKey(Box<Position>),

    #[error("Ledger backend error: {0}")]
    Backend(String),
}

impl From<BalanceError> for LedgerError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InsufficientFunds { requested, available } => {
                LedgerError::InsufficientFunds { requested, available }
            }
            overflow @ BalanceError::Overflow { .. } => LedgerError::Backend(overflow.to_string()),
        }
    }
}

/// Debit-and-insert, conditioned on the balance still matching `expected`.
#[derive(Debug, Clone)]
pub struct OpenTransition {
    pub expected: BalanceSnapshot,
    pub position: Position,
    pub at: Timestamp,
}

/// Credit-and-finalize for one active position.
#[derive(Debug, Clone)]
pub struct CloseTransition {
    pub holder: HolderId,
    pub settlement: Settlement,
    pub at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct Applied {
    pub position: Position,
    pub balance: Balance,
}

/// Floating-field refresh from a revaluation tick. Ignored for terminal positions.
#[derive(Debug, Clone, PartialEq)]
pub struct RevaluationMark {
    pub position_id: PositionId,
    pub current_price: Price,
    pub floating_pnl: Quote,
    pub floating_pnl_pct: Decimal,
    pub at: Timestamp,
}

impl RevaluationMark {
    pub fn from_position(position: &Position) -> Self {
        Self {
            position_id: position.id,
            current_price: position.current_price,
            floating_pnl: position.floating_pnl,
            floating_pnl_pct: position.floating_pnl_pct,
            at: position.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct PositionPage {
    pub positions: Vec<Position>,
    pub total: usize,
}

pub trait LedgerStore: Send + Sync {
    fn balance(&self, holder: HolderId) -> Result<Option<Balance>, LedgerError>;

    fn position(&self, id: PositionId) -> Result<Option<Position>, LedgerError>;

    /// Lookup through the `(holder, idempotency_key)` uniqueness index.
    fn find_by_idempotency_key(&self, holder: HolderId, key: &str) -> Result<Option<Position>, LedgerError>;

    /// Newest first.
    fn positions(
        &self,
        holder: HolderId,
        status: Option<PositionStatus>,
        page: Page,
    ) -> Result<PositionPage, LedgerError>;

    fn active_positions(&self, holder: HolderId, symbol: &str) -> Result<Vec<Position>, LedgerError>;

    fn open(&self, transition: OpenTransition) -> Result<Applied, LedgerError>;

    fn close(&self, transition: CloseTransition) -> Result<Applied, LedgerError>;

    /// Returns how many marks landed on still-active positions.
    fn mark(&self, marks: &[RevaluationMark]) -> Result<usize, LedgerError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<HolderId, Balance>,
    positions: HashMap<PositionId, Position>,
    keys: HashMap<(HolderId, String), PositionId>,
}

#[derive(Debug)]
pub struct InMemoryLedger {
    currency: String,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Deposit intake lives outside the engine; this is how that collaborator funds a holder.
    pub fn fund(&self, holder: HolderId, amount: Quote, at: Timestamp) -> Balance {
        let mut state = self.state.lock();
        let balance = state
            .balances
            .entry(holder)
            .or_insert_with(|| Balance::new(holder, self.currency.clone(), at));
        balance.deposit(amount, at);
        balance.clone()
    }
}

impl LedgerStore for InMemoryLedger {
    fn balance(&self, holder: HolderId) -> Result<Option<Balance>, LedgerError> {
        Ok(self.state.lock().balances.get(&holder).cloned())
    }

    fn position(&self, id: PositionId) -> Result<Option<Position>, LedgerError> {
        Ok(self.state.lock().positions.get(&id).cloned())
    }

    fn find_by_idempotency_key(&self, holder: HolderId, key: &str) -> Result<Option<Position>, LedgerError> {
        let state = self.state.lock();
        Ok(state
            .keys
            .get(&(holder, key.to_string()))
            .and_then(|id| state.positions.get(id))
            .cloned())
    }

    fn positions(
        &self,
        holder: HolderId,
        status: Option<PositionStatus>,
        page: Page,
    ) -> Result<PositionPage, LedgerError> {
        let state = self.state.lock();
        let mut matching: Vec<&Position> = state
            .positions
            .values()
            .filter(|p| p.holder == holder)
            .filter(|p| status.map_or(true, |s| p.status == s))
            .collect();
        matching.sort_by(|a, b| {
            b.opened_at
                .cmp(&a.opened_at)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });

        let total = matching.len();
        let positions = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        Ok(PositionPage { positions, total })
    }

    fn active_positions(&self, holder: HolderId, symbol: &str) -> Result<Vec<Position>, LedgerError> {
        let state = self.state.lock();
        let mut active: Vec<Position> = state
            .positions
            .values()
            .filter(|p| p.holder == holder && p.is_active() && p.instrument.symbol == symbol)
            .cloned()
            .collect();
        active.sort_by_key(|p| p.opened_at);
        Ok(active)
    }

    fn open(&self, transition: OpenTransition) -> Result<Applied, LedgerError> {
        let OpenTransition {
            expected,
            position,
            at,
        } = transition;
        let holder = expected.holder;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        // unique (holder, idempotency_key) wins over everything else, a replay is not a conflict
        if let Some(key) = &position.idempotency_key {
            if let Some(existing) = state
                .keys
                .get(&(holder, key.clone()))
                .and_then(|id| state.positions.get(id))
            {
                return Err(LedgerError::DuplicateKey(Box::new(existing.clone())));
            }
        }

        if state.positions.contains_key(&position.id) {
            return Err(LedgerError::Backend(format!("position id {} already exists", position.id)));
        }

        let balance = state
            .balances
            .get_mut(&holder)
            .ok_or(LedgerError::BalanceNotFound(holder))?;

        if balance.version != expected.version {
            return Err(LedgerError::ConcurrentUpdate(holder));
        }

        // debit checks funds before it writes; nothing after it can fail
        balance.debit(position.investment, at)?;
        let balance = balance.clone();

        if let Some(key) = &position.idempotency_key {
            state.keys.insert((holder, key.clone()), position.id);
        }
        state.positions.insert(position.id, position.clone());

        Ok(Applied { position, balance })
    }

    fn close(&self, transition: CloseTransition) -> Result<Applied, LedgerError> {
        let CloseTransition {
            holder,
            settlement,
            at,
        } = transition;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let position = state
            .positions
            .get_mut(&settlement.position_id)
            .filter(|p| p.holder == holder)
            .ok_or(LedgerError::PositionNotFound(settlement.position_id))?;

        if position.is_terminal() {
            return Err(LedgerError::AlreadyClosed(Box::new(position.clone())));
        }
        if settlement.credit.is_negative() {
            return Err(LedgerError::Backend(format!(
                "negative credit {} for position {}",
                settlement.credit, settlement.position_id
            )));
        }

        let balance = state
            .balances
            .get_mut(&holder)
            .ok_or(LedgerError::BalanceNotFound(holder))?;

        // refused credits leave both rows untouched
        balance.credit(settlement.credit, at)?;
        position.apply_settlement(&settlement, at);

        Ok(Applied {
            position: position.clone(),
            balance: balance.clone(),
        })
    }

    fn mark(&self, marks: &[RevaluationMark]) -> Result<usize, LedgerError> {
        let mut state = self.state.lock();
        let mut applied = 0;
        for mark in marks {
            if let Some(position) = state.positions.get_mut(&mark.position_id) {
                if !position.is_active() {
                    continue;
                }
                position.current_price = mark.current_price;
                position.floating_pnl = mark.floating_pnl;
                position.floating_pnl_pct = mark.floating_pnl_pct;
                position.updated_at = mark.at;
                applied += 1;
            }
        }
        Ok(applied)
    }
}
