// 8.0.2: requests, result types and errors for engine operations.

use crate::balance::Balance;
use crate::ledger::LedgerError;
use crate::math::{self, ValidationError};
use crate::position::{CloseReason, Position};
use crate::types::{Direction, HolderId, Instrument, PositionId, Price, Quote};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub holder: HolderId,
    pub instrument: Instrument,
    pub direction: Direction,
    pub investment: Decimal,
    pub multiplier: u32,
    /// Mid price at request time.
    pub market_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CloseRequest {
    pub holder: HolderId,
    pub position_id: PositionId,
    /// Mid price; the engine applies the exit side of the spread.
    pub exit_price: Decimal,
    pub reason: CloseReason,
}

#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub position: Position,
    pub balance: Balance,
    /// True when the request matched an earlier open and nothing was debited.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeResult {
    pub outcome: Outcome,
    pub pnl: Quote,
    pub percent_return: Decimal,
}

impl TradeResult {
    pub fn new(pnl: Quote, investment: Quote) -> Self {
        let outcome = if pnl.is_positive() {
            Outcome::Win
        } else if pnl.is_negative() {
            Outcome::Loss
        } else {
            Outcome::Flat
        };
        Self {
            outcome,
            pnl,
            percent_return: math::percent_return(pnl, investment),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub position: Position,
    pub balance: Balance,
    pub credit: Quote,
    pub result: TradeResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredClose {
    pub position_id: PositionId,
    pub reason: CloseReason,
    pub mark_price: Price,
    pub floating_pnl: Quote,
}

#[derive(Debug, Clone)]
pub struct RevalueOutcome {
    pub mid_price: Price,
    pub revalued: Vec<Position>,
    /// Closes the caller should settle, in the order the positions were opened.
    pub triggered: Vec<TriggeredClose>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedClose {
    pub position_id: PositionId,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct MarkOutcome {
    pub mid_price: Price,
    pub revalued: usize,
    pub closed: Vec<CloseOutcome>,
    /// Triggered positions something else closed first.
    pub skipped: Vec<PositionId>,
    pub failed: Vec<FailedClose>,
}

#[derive(Debug, Clone)]
pub struct ListOutcome {
    pub positions: Vec<Position>,
    pub balance: Balance,
    pub total: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not eligible: {reason}")]
    EligibilityDenied { reason: String },

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Quote, available: Quote },

    #[error("Balance changed concurrently, retry the request")]
    ConcurrentUpdate,

    #[error("Position {} already {}", .0.id, .0.status)]
    AlreadyClosed(Box<Position>),

    #[error("Position {0} not found")]
    NotFound(PositionId),

    #[error("Operation timed out, check position state before retrying")]
    Timeout,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl EngineError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentUpdate | EngineError::Timeout)
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::EligibilityDenied { .. } => "eligibility_denied",
            EngineError::InsufficientFunds { .. } => "insufficient_funds",
            EngineError::ConcurrentUpdate => "concurrent_update",
            EngineError::AlreadyClosed(_) => "already_closed",
            EngineError::NotFound(_) => "not_found",
            EngineError::Timeout => "timeout",
            EngineError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::ConcurrentUpdate(_) => EngineError::ConcurrentUpdate,
            LedgerError::InsufficientFunds { requested, available } => {
                EngineError::InsufficientFunds { requested, available }
            }
            LedgerError::PositionNotFound(id) => EngineError::NotFound(id),
            LedgerError::AlreadyClosed(position) => EngineError::AlreadyClosed(position),
            other => EngineError::Unexpected(other.to_string()),
        }
    }
}
