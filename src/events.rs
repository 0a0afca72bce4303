// 9.0: every settlement transition produces an event. used for audit trails and
// notifying external systems. the EventPayload enum lists all event types.
// sinks are best-effort: recording an event can never block or fail a transition.

use crate::position::{CloseReason, PositionStatus};
use crate::types::{Direction, HolderId, Multiplier, PositionId, Price, Quote, Timestamp};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // Open events
    PositionOpened(PositionOpenedEvent),
    DuplicateOpen(DuplicateOpenEvent),
    OpenRejected(RejectedEvent),

    // Close events
    PositionClosed(PositionClosedEvent),
    CloseRejected(RejectedEvent),

    // Revaluation events
    TriggerFired(TriggerFiredEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub holder: HolderId,
    pub position_id: PositionId,
    pub symbol: String,
    pub direction: Direction,
    pub investment: Quote,
    pub multiplier: Multiplier,
    pub entry_price: Price,
    pub liquidation_price: Decimal,
    pub new_available: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateOpenEvent {
    pub holder: HolderId,
    pub position_id: PositionId,
    // "explicit", "fingerprint" or "ledger"
    pub matched_on: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedEvent {
    pub holder: HolderId,
    pub position_id: Option<PositionId>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub holder: HolderId,
    pub position_id: PositionId,
    pub status: PositionStatus,
    pub reason: CloseReason,
    pub exit_price: Price,
    pub final_pnl: Quote,
    pub credit: Quote,
    pub new_available: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerFiredEvent {
    pub holder: HolderId,
    pub position_id: PositionId,
    pub reason: CloseReason,
    pub mark_price: Price,
    pub floating_pnl: Quote,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: Event);
}

/// Writes each event as a structured `tracing` record on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: Event) {
        match serde_json::to_string(&event.payload) {
            Ok(payload) => tracing::info!(target: "audit", event_id = event.id.0, ts = event.timestamp.0, %payload),
            Err(e) => tracing::warn!(target: "audit", event_id = event.id.0, error = %e, "unserializable audit event"),
        }
    }
}

/// Bounded in-memory buffer. Oldest events are dropped past `max_events`.
#[derive(Debug)]
pub struct MemorySink {
    events: Mutex<VecDeque<Event>>,
    max_events: usize,
}

impl MemorySink {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: Event) {
        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }
}

/// Hands events to an async consumer. A full channel drops the event instead of waiting.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AuditSink for ChannelSink {
    fn record(&self, event: Event) {
        if let Err(e) = self.tx.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(target: "audit", dropped, error = %e, "audit event dropped");
        }
    }
}
