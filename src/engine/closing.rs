//! Closing and cancelling positions.

use super::core::Engine;
use super::results::{CloseOutcome, CloseRequest, EngineError, TradeResult};
use crate::events::{EventPayload, PositionClosedEvent, RejectedEvent};
use crate::ledger::CloseTransition;
use crate::math::{self, ValidationError};
use crate::position::CloseReason;
use crate::types::{HolderId, PositionId, Price};

impl Engine {
    /// Settles an active position at `exit_price` (a mid) for the given reason.
    ///
    /// `cancelled` is not accepted here; administrative voids go through [`Engine::cancel`].
    pub fn close(&self, request: CloseRequest) -> Result<CloseOutcome, EngineError> {
        if request.reason == CloseReason::Cancelled {
            let err = EngineError::from(ValidationError::UnsupportedReason(request.reason.to_string()));
            self.close_rejected(request.holder, request.position_id, &err);
            return Err(err);
        }
        let result = math::positive_price("exit_price", request.exit_price)
            .map_err(EngineError::from)
            .and_then(|exit_mid| self.settle(request.holder, request.position_id, exit_mid, request.reason));
        self.finish_close(request.holder, request.position_id, result)
    }

    /// Voids an active position: terminal `cancelled`, investment refunded in full.
    pub fn cancel(&self, holder: HolderId, position_id: PositionId) -> Result<CloseOutcome, EngineError> {
        let result = self
            .position(holder, position_id)
            .and_then(|p| self.settle(holder, position_id, p.entry_price, CloseReason::Cancelled));
        self.finish_close(holder, position_id, result)
    }

    fn finish_close(
        &self,
        holder: HolderId,
        position_id: PositionId,
        result: Result<CloseOutcome, EngineError>,
    ) -> Result<CloseOutcome, EngineError> {
        match &result {
            Ok(outcome) => {
                let p = &outcome.position;
                tracing::info!(
                    holder = %holder,
                    position_id = %position_id,
                    status = %p.status,
                    exit_price = ?p.exit_price.map(|x| x.value()),
                    final_pnl = %outcome.result.pnl,
                    credit = %outcome.credit,
                    "position closed"
                );
                self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                    holder,
                    position_id,
                    status: p.status,
                    reason: p.close_reason.unwrap_or(CloseReason::Manual),
                    exit_price: p.exit_price.unwrap_or(p.current_price),
                    final_pnl: outcome.result.pnl,
                    credit: outcome.credit,
                    new_available: outcome.balance.available,
                }));
            }
            Err(e) => self.close_rejected(holder, position_id, e),
        }
        result
    }

    fn close_rejected(&self, holder: HolderId, position_id: PositionId, err: &EngineError) {
        tracing::warn!(holder = %holder, position_id = %position_id, error = %err, "close rejected");
        self.emit_event(EventPayload::CloseRejected(RejectedEvent {
            holder,
            position_id: Some(position_id),
            reason: err.to_string(),
        }));
    }

    // 8.4: load, check, settle, then one atomic credit-and-finalize.
    // the ledger re-checks `active` inside the transition, so a racing close loses there.
    fn settle(
        &self,
        holder: HolderId,
        position_id: PositionId,
        exit_mid: Price,
        reason: CloseReason,
    ) -> Result<CloseOutcome, EngineError> {
        let position = self.position(holder, position_id)?;
        if position.is_terminal() {
            return Err(EngineError::AlreadyClosed(Box::new(position)));
        }

        let settlement = position.settle(exit_mid, reason)?;
        let credit = settlement.credit;
        let final_pnl = settlement.final_pnl;
        let applied = self.ledger.close(CloseTransition {
            holder,
            settlement,
            at: self.clock.now(),
        })?;

        Ok(CloseOutcome {
            position: applied.position,
            balance: applied.balance,
            credit,
            result: TradeResult::new(final_pnl, position.investment),
        })
    }
}
