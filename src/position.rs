// 3.0: the leveraged position record. created active, revalued by ticks, closed exactly once.
// 3.2 has the settlement math for the terminal transition at the bottom.

use crate::math::{self, Leg, ValidatedOpen, ValidationError};
use crate::types::{Direction, HolderId, Instrument, Multiplier, PositionId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Closed,
    Liquidated,
    StoppedOut,
    TakeProfit,
    Cancelled,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Closed => "closed",
            PositionStatus::Liquidated => "liquidated",
            PositionStatus::StoppedOut => "stopped_out",
            PositionStatus::TakeProfit => "take_profit",
            PositionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "active" | "open" => Some(PositionStatus::Active),
            "closed" => Some(PositionStatus::Closed),
            "liquidated" => Some(PositionStatus::Liquidated),
            "stopped_out" => Some(PositionStatus::StoppedOut),
            "take_profit" => Some(PositionStatus::TakeProfit),
            "cancelled" | "canceled" => Some(PositionStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a position is being closed. Supplied by the caller or by a revaluation trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    #[serde(alias = "user", alias = "user_closed")]
    Manual,
    #[serde(alias = "liquidation")]
    Liquidated,
    #[serde(alias = "stop_loss")]
    StoppedOut,
    TakeProfit,
    Cancelled,
}

impl CloseReason {
    pub fn terminal_status(&self) -> PositionStatus {
        match self {
            CloseReason::Manual => PositionStatus::Closed,
            CloseReason::Liquidated => PositionStatus::Liquidated,
            CloseReason::StoppedOut => PositionStatus::StoppedOut,
            CloseReason::TakeProfit => PositionStatus::TakeProfit,
            CloseReason::Cancelled => PositionStatus::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Manual => "manual",
            CloseReason::Liquidated => "liquidated",
            CloseReason::StoppedOut => "stopped_out",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub holder: HolderId,
    pub idempotency_key: Option<String>,
    pub instrument: Instrument,
    pub direction: Direction,
    pub investment: Quote,
    pub multiplier: Multiplier,
    pub volume: Quote,
    pub spread: Decimal,
    pub spread_cost: Quote,
    pub market_price: Price,
    pub entry_price: Price,
    pub liquidation_price: Decimal,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
    pub current_price: Price,
    pub floating_pnl: Quote,
    pub floating_pnl_pct: Decimal,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub exit_price: Option<Price>,
    pub final_pnl: Option<Quote>,
    pub opened_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Position {
    /// Builds a fresh active position. Entry price and liquidation price are fixed here.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: PositionId,
        holder: HolderId,
        instrument: Instrument,
        direction: Direction,
        params: &ValidatedOpen,
        spread: Decimal,
        idempotency_key: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        let entry_price = math::spread_adjusted_price(params.market_price, spread, direction, Leg::Entry);
        let volume = math::volume(params.investment, params.multiplier);

        Self {
            id,
            holder,
            idempotency_key,
            instrument,
            direction,
            investment: params.investment,
            multiplier: params.multiplier,
            volume,
            spread,
            spread_cost: math::spread_cost(volume, spread),
            market_price: params.market_price,
            entry_price,
            liquidation_price: math::liquidation_price(entry_price, direction, params.multiplier),
            stop_loss: params.stop_loss,
            take_profit: params.take_profit,
            current_price: entry_price,
            floating_pnl: Quote::zero(),
            floating_pnl_pct: Decimal::ZERO,
            status: PositionStatus::Active,
            close_reason: None,
            exit_price: None,
            final_pnl: None,
            opened_at: timestamp,
            closed_at: None,
            updated_at: timestamp,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    // 3.1: what the holder would get right now: exit side of the spread
    pub fn mark_price(&self, mid: Price) -> Price {
        math::spread_adjusted_price(mid, self.spread, self.direction, Leg::Exit)
    }

    pub fn pnl_at(&self, price: Price) -> Quote {
        math::floating_pnl(self.direction, self.investment, self.multiplier, self.entry_price, price)
    }

    /// Refreshes floating fields from a mid price. Only meaningful while active.
    pub fn revalue(&mut self, mid: Price, timestamp: Timestamp) {
        debug_assert!(self.is_active(), "revaluing a terminal position");
        let mark = self.mark_price(mid);
        let pnl = self.pnl_at(mark);
        self.current_price = mark;
        self.floating_pnl = pnl;
        self.floating_pnl_pct = math::percent_return(pnl, self.investment);
        self.updated_at = timestamp;
    }

    /// First trigger that fires at `mark`: liquidation beats stop-loss beats take-profit.
    pub fn trigger_at(&self, mark: Price) -> Option<CloseReason> {
        if math::should_liquidate(self.pnl_at(mark), self.investment) {
            return Some(CloseReason::Liquidated);
        }
        if let Some(stop) = self.stop_loss {
            if math::stop_loss_hit(self.direction, mark, stop) {
                return Some(CloseReason::StoppedOut);
            }
        }
        if let Some(target) = self.take_profit {
            if math::take_profit_hit(self.direction, mark, target) {
                return Some(CloseReason::TakeProfit);
            }
        }
        None
    }

    // 3.2: terminal settlement. pure, the ledger applies the result atomically.
    pub fn settle(&self, exit_mid: Price, reason: CloseReason) -> Result<Settlement, ValidationError> {
        if reason == CloseReason::Cancelled {
            return Ok(self.cancellation());
        }

        let exit_price = self.mark_price(exit_mid);
        let raw_pnl = self.pnl_at(exit_price);

        let consistent = match reason {
            CloseReason::Manual | CloseReason::Cancelled => true,
            CloseReason::Liquidated => math::should_liquidate(raw_pnl, self.investment),
            CloseReason::StoppedOut => self
                .stop_loss
                .is_some_and(|stop| math::stop_loss_hit(self.direction, exit_price, stop)),
            CloseReason::TakeProfit => self
                .take_profit
                .is_some_and(|target| math::take_profit_hit(self.direction, exit_price, target)),
        };
        if !consistent {
            return Err(ValidationError::ReasonInconsistent {
                reason: reason.to_string(),
                price: exit_price.value(),
            });
        }

        let final_pnl = math::settlement_pnl(raw_pnl, self.investment);
        Ok(Settlement {
            position_id: self.id,
            reason,
            status: reason.terminal_status(),
            exit_price,
            raw_pnl,
            final_pnl,
            credit: math::settlement_credit(self.investment, final_pnl),
        })
    }

    // voided positions refund the investment in full
    fn cancellation(&self) -> Settlement {
        Settlement {
            position_id: self.id,
            reason: CloseReason::Cancelled,
            status: PositionStatus::Cancelled,
            exit_price: self.entry_price,
            raw_pnl: Quote::zero(),
            final_pnl: Quote::zero(),
            credit: self.investment,
        }
    }

    /// Writes the terminal fields. Callers must have checked the position is still active.
    pub fn apply_settlement(&mut self, settlement: &Settlement, timestamp: Timestamp) {
        debug_assert!(self.is_active(), "second terminal write");
        self.status = settlement.status;
        self.close_reason = Some(settlement.reason);
        self.exit_price = Some(settlement.exit_price);
        self.final_pnl = Some(settlement.final_pnl);
        self.current_price = settlement.exit_price;
        self.floating_pnl = settlement.final_pnl;
        self.floating_pnl_pct = math::percent_return(settlement.final_pnl, self.investment);
        self.closed_at = Some(timestamp);
        self.updated_at = timestamp;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub position_id: PositionId,
    pub reason: CloseReason,
    pub status: PositionStatus,
    pub exit_price: Price,
    pub raw_pnl: Quote,
    pub final_pnl: Quote,
    pub credit: Quote,
}
