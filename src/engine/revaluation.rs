// 8.5: revaluation. a mid-price tick refreshes floating fields of a holder's
// active positions on one instrument and reports which ones hit a trigger.
// revalue never touches balances; revalue_and_settle closes the triggered
// positions afterwards, each through a fresh close with its own ledger check.

use super::core::Engine;
use super::results::{CloseRequest, EngineError, FailedClose, MarkOutcome, RevalueOutcome, TriggeredClose};
use crate::events::{EventPayload, TriggerFiredEvent};
use crate::ledger::RevaluationMark;
use crate::math::{self, ValidationError};
use crate::types::HolderId;
use rust_decimal::Decimal;

impl Engine {
    pub fn revalue(&self, holder: HolderId, symbol: &str, mid_price: Decimal) -> Result<RevalueOutcome, EngineError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ValidationError::EmptySymbol.into());
        }
        let mid = math::positive_price("mid_price", mid_price)?;
        let now = self.clock.now();

        let mut positions = self.ledger.active_positions(holder, &symbol)?;
        let mut triggered = Vec::new();
        for position in positions.iter_mut() {
            position.revalue(mid, now);
            if let Some(reason) = position.trigger_at(position.current_price) {
                let fired = TriggeredClose {
                    position_id: position.id,
                    reason,
                    mark_price: position.current_price,
                    floating_pnl: position.floating_pnl,
                };
                tracing::info!(
                    holder = %holder,
                    position_id = %position.id,
                    reason = %reason,
                    mark_price = %fired.mark_price,
                    "trigger fired"
                );
                self.emit_event(EventPayload::TriggerFired(TriggerFiredEvent {
                    holder,
                    position_id: position.id,
                    reason,
                    mark_price: fired.mark_price,
                    floating_pnl: fired.floating_pnl,
                }));
                triggered.push(fired);
            }
        }

        let marks: Vec<RevaluationMark> = positions.iter().map(RevaluationMark::from_position).collect();
        let applied = self.ledger.mark(&marks)?;
        tracing::debug!(holder = %holder, symbol = %symbol, mid = %mid, applied, triggered = triggered.len(), "revalued");

        Ok(RevalueOutcome {
            mid_price: mid,
            revalued: positions,
            triggered,
        })
    }

    /// Revalues, then settles every triggered position at the same mid.
    pub fn revalue_and_settle(
        &self,
        holder: HolderId,
        symbol: &str,
        mid_price: Decimal,
    ) -> Result<MarkOutcome, EngineError> {
        let tick = self.revalue(holder, symbol, mid_price)?;

        let mut closed = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        for fired in &tick.triggered {
            let request = CloseRequest {
                holder,
                position_id: fired.position_id,
                exit_price: tick.mid_price.value(),
                reason: fired.reason,
            };
            match self.close(request) {
                Ok(outcome) => closed.push(outcome),
                // someone else got there first
                Err(EngineError::AlreadyClosed(_)) | Err(EngineError::NotFound(_)) => skipped.push(fired.position_id),
                Err(e) => failed.push(FailedClose {
                    position_id: fired.position_id,
                    error: e.to_string(),
                }),
            }
        }

        Ok(MarkOutcome {
            mid_price: tick.mid_price,
            revalued: tick.revalued.len(),
            closed,
            skipped,
            failed,
        })
    }
}
