//! Opening positions.
//!
//! Order of checks: range validation, deduplication, then the ledger
//! read-validate-write loop (funds, eligibility, atomic debit-and-insert).
//! Every reservation taken here is either committed to the new position or
//! released before returning.

use super::core::Engine;
use super::results::{EngineError, OpenOutcome, OpenRequest};
use crate::eligibility::{Eligibility, EligibilityRequest};
use crate::events::{DuplicateOpenEvent, EventPayload, PositionOpenedEvent, RejectedEvent};
use crate::idempotency::{DedupKey, Reservation};
use crate::ledger::{LedgerError, OpenTransition};
use crate::math::{self, ValidatedOpen, ValidationError};
use crate::position::Position;
use crate::types::{PositionId, Quote, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchedOn {
    Explicit,
    Fingerprint,
    Ledger,
}

impl MatchedOn {
    fn as_str(&self) -> &'static str {
        match self {
            MatchedOn::Explicit => "explicit",
            MatchedOn::Fingerprint => "fingerprint",
            MatchedOn::Ledger => "ledger",
        }
    }
}

impl Engine {
    pub fn open(&self, request: OpenRequest) -> Result<OpenOutcome, EngineError> {
        let holder = request.holder;
        let result = self.try_open(&request);

        match &result {
            Ok(outcome) if outcome.duplicate => {
                tracing::info!(
                    holder = %holder,
                    position_id = %outcome.position.id,
                    "duplicate open returned existing position"
                );
            }
            Ok(outcome) => {
                let p = &outcome.position;
                tracing::info!(
                    holder = %holder,
                    position_id = %p.id,
                    symbol = %p.instrument.symbol,
                    direction = p.direction.as_str(),
                    investment = %p.investment,
                    multiplier = p.multiplier.value(),
                    entry_price = %p.entry_price,
                    "position opened"
                );
                self.emit_event(EventPayload::PositionOpened(PositionOpenedEvent {
                    holder,
                    position_id: p.id,
                    symbol: p.instrument.symbol.clone(),
                    direction: p.direction,
                    investment: p.investment,
                    multiplier: p.multiplier,
                    entry_price: p.entry_price,
                    liquidation_price: p.liquidation_price,
                    new_available: outcome.balance.available,
                }));
            }
            Err(e) => {
                tracing::warn!(holder = %holder, error = %e, retryable = e.is_retryable(), "open rejected");
                self.emit_event(EventPayload::OpenRejected(RejectedEvent {
                    holder,
                    position_id: None,
                    reason: e.to_string(),
                }));
            }
        }
        result
    }

    fn try_open(&self, request: &OpenRequest) -> Result<OpenOutcome, EngineError> {
        if request.instrument.symbol.is_empty() {
            return Err(ValidationError::EmptySymbol.into());
        }
        let params = math::validate_open(
            request.investment,
            request.multiplier,
            self.config.max_multiplier,
            request.market_price,
            request.stop_loss,
            request.take_profit,
        )?;

        let now = self.clock.now();
        let keys = self.dedup_keys(request, &params, now);

        let mut reserved: Vec<&DedupKey> = Vec::with_capacity(keys.len());
        for (key, matched_on) in &keys {
            match self.guard.reserve(key, now) {
                Reservation::Fresh => reserved.push(key),
                Reservation::Existing(id) => {
                    self.release_all(&reserved);
                    return self.replay(request, id, *matched_on);
                }
                Reservation::InFlight => {
                    self.release_all(&reserved);
                    return self.resolve_in_flight(request);
                }
            }
        }

        let result = self.open_with_retries(request, &params, now);
        match &result {
            Ok(outcome) => {
                for key in &reserved {
                    self.guard.commit(key, outcome.position.id, now);
                }
            }
            Err(_) => self.release_all(&reserved),
        }
        result
    }

    fn dedup_keys(&self, request: &OpenRequest, params: &ValidatedOpen, now: Timestamp) -> Vec<(DedupKey, MatchedOn)> {
        let mut keys = Vec::with_capacity(2);
        if let Some(key) = &request.idempotency_key {
            keys.push((DedupKey::explicit(request.holder, key.clone()), MatchedOn::Explicit));
        }
        keys.push((
            DedupKey::fingerprint(
                request.holder,
                &request.instrument.symbol,
                params.investment.value(),
                request.direction,
                now,
                self.config.idempotency.bucket_millis(),
            ),
            MatchedOn::Fingerprint,
        ));
        keys
    }

    fn release_all(&self, keys: &[&DedupKey]) {
        for key in keys {
            self.guard.release(key);
        }
    }

    // a committed guard entry always points at a ledger row; a missing one means the store lost it
    fn replay(&self, request: &OpenRequest, id: PositionId, matched_on: MatchedOn) -> Result<OpenOutcome, EngineError> {
        let position = self
            .ledger
            .position(id)?
            .filter(|p| p.holder == request.holder)
            .ok_or_else(|| EngineError::Unexpected(format!("idempotency entry points at missing position {id}")))?;
        self.duplicate(position, matched_on)
    }

    fn resolve_in_flight(&self, request: &OpenRequest) -> Result<OpenOutcome, EngineError> {
        if let Some(key) = &request.idempotency_key {
            if let Some(position) = self.ledger.find_by_idempotency_key(request.holder, key)? {
                return self.duplicate(position, MatchedOn::Ledger);
            }
        }
        Err(EngineError::ConcurrentUpdate)
    }

    fn duplicate(&self, position: Position, matched_on: MatchedOn) -> Result<OpenOutcome, EngineError> {
        let balance = self.balance(position.holder)?;
        self.emit_event(EventPayload::DuplicateOpen(DuplicateOpenEvent {
            holder: position.holder,
            position_id: position.id,
            matched_on: matched_on.as_str().to_string(),
        }));
        Ok(OpenOutcome {
            position,
            balance,
            duplicate: true,
        })
    }

    // 8.3: read-validate-write, re-run from the top on a version conflict
    fn open_with_retries(
        &self,
        request: &OpenRequest,
        params: &ValidatedOpen,
        now: Timestamp,
    ) -> Result<OpenOutcome, EngineError> {
        let mut attempt = 0;
        loop {
            match self.open_once(request, params, now) {
                Err(EngineError::ConcurrentUpdate) if attempt < self.config.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(holder = %request.holder, attempt, "balance changed during open, retrying");
                }
                other => return other,
            }
        }
    }

    fn open_once(&self, request: &OpenRequest, params: &ValidatedOpen, now: Timestamp) -> Result<OpenOutcome, EngineError> {
        let holder = request.holder;
        let snapshot = match self.ledger.balance(holder)? {
            Some(balance) => balance.snapshot(),
            None => {
                return Err(EngineError::InsufficientFunds {
                    requested: params.investment,
                    available: Quote::zero(),
                })
            }
        };
        if snapshot.available < params.investment {
            return Err(EngineError::InsufficientFunds {
                requested: params.investment,
                available: snapshot.available,
            });
        }

        if let Eligibility::Denied(reason) = self.eligibility.check(&EligibilityRequest {
            holder,
            instrument: &request.instrument,
            investment: params.investment,
            multiplier: params.multiplier,
        }) {
            return Err(EngineError::EligibilityDenied { reason });
        }

        let spread = self.config.spreads.for_class(request.instrument.asset_class);
        let position = Position::open(
            PositionId::generate(),
            holder,
            request.instrument.clone(),
            request.direction,
            params,
            spread,
            request.idempotency_key.clone(),
            now,
        );

        match self.ledger.open(OpenTransition {
            expected: snapshot,
            position,
            at: now,
        }) {
            Ok(applied) => Ok(OpenOutcome {
                position: applied.position,
                balance: applied.balance,
                duplicate: false,
            }),
            // the guard forgot the key (expired or another process) but the ledger did not
            Err(LedgerError::DuplicateKey(existing)) => self.duplicate(*existing, MatchedOn::Ledger),
            Err(e) => Err(e.into()),
        }
    }
}
