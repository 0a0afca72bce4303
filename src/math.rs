// 2.0: position math. pure and deterministic, no I/O, no state.
// entry/exit pricing, volume, floating pnl, liquidation price, triggers, loss cap.
// everything is Decimal so liquidation detection and the settlement cap walk the same path.

use crate::types::{Direction, Multiplier, Price, Quote};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Settlement amounts are rounded to this many decimal places before the loss cap.
pub const MONEY_SCALE: u32 = 8;

/// Which side of a round trip a price is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Entry,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("investment must be positive, got {0}")]
    NonPositiveInvestment(Decimal),

    #[error("multiplier {value} outside 1..={ceiling}")]
    MultiplierOutOfRange { value: u32, ceiling: u32 },

    #[error("{field} must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: Decimal },

    #[error("instrument symbol is empty")]
    EmptySymbol,

    #[error("close reason {reason} does not match price {price}")]
    ReasonInconsistent { reason: String, price: Decimal },

    #[error("close reason {0} is not accepted here")]
    UnsupportedReason(String),
}

/// Open parameters that passed range checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedOpen {
    pub investment: Quote,
    pub multiplier: Multiplier,
    pub market_price: Price,
    pub stop_loss: Option<Price>,
    pub take_profit: Option<Price>,
}

// 2.1: range checks. nothing downstream runs unless this passes.
pub fn validate_open(
    investment: Decimal,
    multiplier: u32,
    ceiling: u32,
    market_price: Decimal,
    stop_loss: Option<Decimal>,
    take_profit: Option<Decimal>,
) -> Result<ValidatedOpen, ValidationError> {
    if investment <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveInvestment(investment));
    }
    let multiplier = Multiplier::new(multiplier, ceiling)
        .ok_or(ValidationError::MultiplierOutOfRange { value: multiplier, ceiling })?;
    let market_price = positive_price("market_price", market_price)?;
    let stop_loss = stop_loss.map(|v| positive_price("stop_loss", v)).transpose()?;
    let take_profit = take_profit.map(|v| positive_price("take_profit", v)).transpose()?;

    Ok(ValidatedOpen {
        investment: Quote::new(investment),
        multiplier,
        market_price,
        stop_loss,
        take_profit,
    })
}

pub fn positive_price(field: &'static str, value: Decimal) -> Result<Price, ValidationError> {
    Price::new(value).ok_or(ValidationError::NonPositivePrice { field, value })
}

pub fn direction(input: &str) -> Direction {
    Direction::parse(input)
}

// 2.2: spread. long opens at the ask and exits at the bid, short the reverse.
// exiting on the same side as entry would hand the spread back to the holder.
// spread is validated < 1 by config, so the bid stays positive.
pub fn spread_adjusted_price(mid: Price, spread: Decimal, direction: Direction, leg: Leg) -> Price {
    let half_spread = mid.value() * spread / dec!(2);
    let at_ask = match leg {
        Leg::Entry => direction == Direction::Long,
        Leg::Exit => direction == Direction::Short,
    };
    if at_ask {
        Price::new_unchecked(mid.value().checked_add(half_spread).unwrap_or(Decimal::MAX))
    } else {
        Price::new_unchecked(mid.value() - half_spread)
    }
}

pub fn volume(investment: Quote, multiplier: Multiplier) -> Quote {
    Quote::new(
        investment
            .value()
            .checked_mul(multiplier.as_decimal())
            .unwrap_or(Decimal::MAX),
    )
}

pub fn spread_cost(volume: Quote, spread: Decimal) -> Quote {
    volume.mul(spread / dec!(2))
}

/// Saturates at `Decimal::MAX` when `current` is astronomically far above a tiny entry.
pub fn relative_change(entry: Decimal, current: Decimal) -> Decimal {
    if entry <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (current - entry).checked_div(entry).unwrap_or(Decimal::MAX)
}

// 2.3: the pnl formula. direction * investment * multiplier * relative change
// past the Decimal range a loss saturates at -investment and a gain at Decimal::MAX.
pub fn floating_pnl(
    direction: Direction,
    investment: Quote,
    multiplier: Multiplier,
    entry: Price,
    current: Price,
) -> Quote {
    let change = relative_change(entry.value(), current.value());
    let pnl = (direction.sign() * investment.value())
        .checked_mul(multiplier.as_decimal())
        .and_then(|exposure| exposure.checked_mul(change));
    match pnl {
        Some(pnl) if change != Decimal::MAX => Quote::new(pnl),
        _ if direction.sign() * change < Decimal::ZERO => investment.negate(),
        _ => Quote::new(Decimal::MAX),
    }
}

pub fn percent_return(pnl: Quote, investment: Quote) -> Decimal {
    if investment.value().is_zero() {
        return Decimal::ZERO;
    }
    pnl.value()
        .checked_div(investment.value())
        .and_then(|ratio| ratio.checked_mul(dec!(100)))
        .map(|pct| pct.round_dp(4))
        .unwrap_or(if pnl.is_negative() { Decimal::MIN } else { Decimal::MAX })
}

// 2.4: price where floating loss equals the whole investment.
// a 1x long liquidates at zero, which no positive price reaches.
pub fn liquidation_price(entry: Price, direction: Direction, multiplier: Multiplier) -> Decimal {
    entry
        .value()
        .checked_mul(Decimal::ONE - direction.sign() / multiplier.as_decimal())
        .unwrap_or(Decimal::MAX)
}

// equality liquidates. compared at money scale so detection and the close-time
// cap see the same number.
pub fn should_liquidate(pnl: Quote, investment: Quote) -> bool {
    pnl.value().round_dp(MONEY_SCALE) <= -investment.value()
}

pub fn stop_loss_hit(direction: Direction, price: Price, stop: Price) -> bool {
    match direction {
        Direction::Long => price <= stop,
        Direction::Short => price >= stop,
    }
}

pub fn take_profit_hit(direction: Direction, price: Price, target: Price) -> bool {
    match direction {
        Direction::Long => price >= target,
        Direction::Short => price <= target,
    }
}

// 2.5: loss cap. only ever applied at the close boundary.
pub fn cap_loss(pnl: Quote, investment: Quote) -> Quote {
    if pnl.value() < -investment.value() {
        investment.negate()
    } else {
        pnl
    }
}

/// Final pnl for a close: rounded to money scale, then capped.
pub fn settlement_pnl(raw: Quote, investment: Quote) -> Quote {
    cap_loss(Quote::new(raw.value().round_dp(MONEY_SCALE)), investment)
}

/// Cash returned to `available` on close. Never negative once the cap is applied.
pub fn settlement_credit(investment: Quote, final_pnl: Quote) -> Quote {
    Quote::new(
        investment
            .value()
            .checked_add(final_pnl.value())
            .unwrap_or(Decimal::MAX),
    )
}
