//! Request and response bodies.
//!
//! `investment` and `multiplier` are the canonical names; `amount` and
//! `leverage` are still accepted on input for older clients.

use crate::balance::Balance;
use crate::engine::{CloseOutcome, FailedClose, MarkOutcome, TradeResult};
use crate::position::{CloseReason, Position, PositionStatus};
use crate::types::{AssetClass, PositionId, Price, Quote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenBody {
    pub instrument: String,
    #[serde(default = "default_asset_class")]
    pub asset_class: AssetClass,
    /// buy/sell, long/short or up/down.
    pub direction: String,
    #[serde(alias = "amount")]
    pub investment: Decimal,
    #[serde(alias = "leverage")]
    pub multiplier: u32,
    pub market_price: Decimal,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_asset_class() -> AssetClass {
    AssetClass::Crypto
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseBody {
    pub position_id: PositionId,
    pub exit_price: Decimal,
    #[serde(default = "default_reason")]
    pub reason: CloseReason,
}

fn default_reason() -> CloseReason {
    CloseReason::Manual
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevalueBody {
    pub instrument: String,
    pub mid_price: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub currency: String,
    pub available: Quote,
    pub version: u64,
}

impl From<&Balance> for BalanceView {
    fn from(balance: &Balance) -> Self {
        Self {
            currency: balance.currency.clone(),
            available: balance.available,
            version: balance.version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenResponse {
    pub position: Position,
    pub balance: BalanceView,
    pub duplicate: bool,
}

#[derive(Debug, Serialize)]
pub struct CloseResponse {
    pub position: Position,
    pub balance: BalanceView,
    pub credit: Quote,
    pub result: TradeResult,
}

impl From<CloseOutcome> for CloseResponse {
    fn from(outcome: CloseOutcome) -> Self {
        Self {
            balance: BalanceView::from(&outcome.balance),
            position: outcome.position,
            credit: outcome.credit,
            result: outcome.result,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub positions: Vec<Position>,
    pub balance: BalanceView,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct AutoClosed {
    pub position_id: PositionId,
    pub reason: Option<CloseReason>,
    pub status: PositionStatus,
    pub exit_price: Option<Price>,
    pub final_pnl: Option<Quote>,
    pub credit: Quote,
}

#[derive(Debug, Serialize)]
pub struct RevalueResponse {
    pub mid_price: Price,
    pub revalued: usize,
    pub closed: Vec<AutoClosed>,
    pub skipped: Vec<PositionId>,
    pub failed: Vec<FailedClose>,
    pub balance: Option<BalanceView>,
}

impl From<MarkOutcome> for RevalueResponse {
    fn from(outcome: MarkOutcome) -> Self {
        // the last close carries the most recent balance
        let balance = outcome.closed.last().map(|c| BalanceView::from(&c.balance));
        Self {
            mid_price: outcome.mid_price,
            revalued: outcome.revalued,
            closed: outcome
                .closed
                .into_iter()
                .map(|c| AutoClosed {
                    position_id: c.position.id,
                    reason: c.position.close_reason,
                    status: c.position.status,
                    exit_price: c.position.exit_price,
                    final_pnl: c.position.final_pnl,
                    credit: c.credit,
                })
                .collect(),
            skipped: outcome.skipped,
            failed: outcome.failed,
            balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn open_body_accepts_legacy_names() {
        let body: OpenBody = serde_json::from_str(
            r#"{"instrument":"btcusd","direction":"buy","amount":"50","leverage":10,"market_price":100}"#,
        )
        .unwrap();
        assert_eq!(body.investment, dec!(50));
        assert_eq!(body.multiplier, 10);
        assert_eq!(body.asset_class, AssetClass::Crypto);
        assert!(body.stop_loss.is_none());
    }

    #[test]
    fn close_body_defaults_to_manual() {
        let id = PositionId::generate();
        let body: CloseBody =
            serde_json::from_value(serde_json::json!({ "position_id": id.to_string(), "exit_price": 101.5 })).unwrap();
        assert_eq!(body.reason, CloseReason::Manual);
        assert_eq!(body.exit_price, dec!(101.5));

        let body: CloseBody = serde_json::from_value(
            serde_json::json!({ "position_id": id.to_string(), "exit_price": 1, "reason": "stop_loss" }),
        )
        .unwrap();
        assert_eq!(body.reason, CloseReason::StoppedOut);
    }
}
