// 8.0 engine/core.rs: the lifecycle controller. owns no balances or positions itself,
// every state change goes through the ledger store.

use super::config::EngineConfig;
use super::results::{EngineError, ListOutcome};
use crate::balance::Balance;
use crate::eligibility::{AllowAll, EligibilityCheck};
use crate::events::{AuditSink, Event, EventId, EventPayload, TracingSink};
use crate::idempotency::{IdempotencyGuard, InMemoryGuard};
use crate::ledger::{LedgerStore, Page};
use crate::position::{Position, PositionStatus};
use crate::types::{Clock, HolderId, PositionId, SystemClock, Timestamp};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/** 8.1: main engine struct. collaborators are shared so the engine is cheap to clone into handlers */
#[derive(Clone)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) ledger: Arc<dyn LedgerStore>,
    pub(super) guard: Arc<dyn IdempotencyGuard>,
    pub(super) eligibility: Arc<dyn EligibilityCheck>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) next_event_id: Arc<AtomicU64>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("guard_entries", &self.guard.len())
            .field("next_event_id", &self.next_event_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: EngineConfig, ledger: Arc<dyn LedgerStore>) -> Self {
        let guard = Arc::new(InMemoryGuard::new(config.idempotency.clone()));
        Self {
            config,
            ledger,
            guard,
            eligibility: Arc::new(AllowAll),
            audit: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
            next_event_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn IdempotencyGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_eligibility(mut self, eligibility: Arc<dyn EligibilityCheck>) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn time(&self) -> Timestamp {
        self.clock.now()
    }

    /// Current balance, or a zero balance for a holder the ledger has never seen.
    pub fn balance(&self, holder: HolderId) -> Result<Balance, EngineError> {
        Ok(self
            .ledger
            .balance(holder)?
            .unwrap_or_else(|| Balance::new(holder, self.config.currency.clone(), self.clock.now())))
    }

    /// A holder's own position. Someone else's id reads as not found.
    pub fn position(&self, holder: HolderId, id: PositionId) -> Result<Position, EngineError> {
        self.ledger
            .position(id)?
            .filter(|p| p.holder == holder)
            .ok_or(EngineError::NotFound(id))
    }

    // 8.2: newest first, page size clamped to the configured maximum
    pub fn list(
        &self,
        holder: HolderId,
        status: Option<PositionStatus>,
        page: Page,
    ) -> Result<ListOutcome, EngineError> {
        let page = Page {
            limit: page.limit.clamp(1, self.config.max_page_size),
            offset: page.offset,
        };
        let found = self.ledger.positions(holder, status, page)?;
        Ok(ListOutcome {
            positions: found.positions,
            balance: self.balance(holder)?,
            total: found.total,
        })
    }

    /// Sweeps expired idempotency entries.
    pub fn gc_idempotency(&self) -> usize {
        let removed = self.guard.gc(self.clock.now());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.guard.len(), "idempotency entries expired");
        }
        removed
    }

    pub(super) fn emit_event(&self, payload: EventPayload) {
        let id = EventId(self.next_event_id.fetch_add(1, Ordering::Relaxed));
        self.audit.record(Event::new(id, self.clock.now(), payload));
    }
}
