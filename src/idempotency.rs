//! Open-request deduplication.
//!
//! Two keys guard every open: the caller's explicit idempotency key (scoped to the
//! holder) and a fingerprint of holder, instrument, investment and direction inside a
//! short time bucket, which catches double submissions that carry no key at all.
//!
//! The guard is advisory. The ledger's uniqueness constraint on
//! `(holder, idempotency_key)` is the source of truth; the in-memory guard here is
//! only correct for a single process.

use crate::types::{Direction, HolderId, PositionId, Timestamp};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configuration for open-request deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// How long a reservation or committed entry is honored, in seconds.
    pub ttl_secs: u64,
    /// Width of the fingerprint time bucket, in seconds.
    pub bucket_secs: u64,
    /// Past this many entries a reserve call sweeps expired ones.
    pub max_entries: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            bucket_secs: 5,
            max_entries: 100_000,
        }
    }
}

impl GuardConfig {
    pub fn ttl_millis(&self) -> i64 {
        (self.ttl_secs as i64).saturating_mul(1000)
    }

    pub fn bucket_millis(&self) -> i64 {
        (self.bucket_secs as i64).saturating_mul(1000).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Explicit {
        holder: HolderId,
        key: String,
    },
    Fingerprint {
        holder: HolderId,
        symbol: String,
        investment: Decimal,
        direction: Direction,
        bucket: i64,
    },
}

impl DedupKey {
    pub fn explicit(holder: HolderId, key: impl Into<String>) -> Self {
        DedupKey::Explicit {
            holder,
            key: key.into(),
        }
    }

    pub fn fingerprint(
        holder: HolderId,
        symbol: &str,
        investment: Decimal,
        direction: Direction,
        now: Timestamp,
        bucket_millis: i64,
    ) -> Self {
        DedupKey::Fingerprint {
            holder,
            symbol: symbol.to_string(),
            investment: investment.normalize(),
            direction,
            bucket: now.as_millis().div_euclid(bucket_millis.max(1)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the key and must `commit` or `release` it.
    Fresh,
    /// A position was already created for this key.
    Existing(PositionId),
    /// Another request holds the key and has not finished.
    InFlight,
}

/// Deduplication store. `reserve` must check and claim a key as one atomic step.
pub trait IdempotencyGuard: Send + Sync {
    fn reserve(&self, key: &DedupKey, now: Timestamp) -> Reservation;

    fn commit(&self, key: &DedupKey, position_id: PositionId, now: Timestamp);

    /// Drops a pending reservation. Committed entries are left alone.
    fn release(&self, key: &DedupKey);

    /// Evicts expired entries, returning how many were removed.
    fn gc(&self, now: Timestamp) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    Pending,
    Committed(PositionId),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: SlotState,
    at: Timestamp,
}

impl Slot {
    fn expired(&self, now: Timestamp, ttl_millis: i64) -> bool {
        now.as_millis() - self.at.as_millis() >= ttl_millis
    }
}

/// Process-local guard backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryGuard {
    entries: DashMap<DedupKey, Slot>,
    config: GuardConfig,
}

impl InMemoryGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }
}

impl IdempotencyGuard for InMemoryGuard {
    fn reserve(&self, key: &DedupKey, now: Timestamp) -> Reservation {
        let ttl = self.config.ttl_millis();
        let pending = Slot {
            state: SlotState::Pending,
            at: now,
        };

        let reservation = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = *occupied.get();
                if slot.expired(now, ttl) {
                    occupied.insert(pending);
                    Reservation::Fresh
                } else {
                    match slot.state {
                        SlotState::Pending => Reservation::InFlight,
                        SlotState::Committed(id) => Reservation::Existing(id),
                    }
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
                Reservation::Fresh
            }
        };

        if self.entries.len() > self.config.max_entries {
            let evicted = self.gc(now);
            tracing::debug!(evicted, remaining = self.entries.len(), "idempotency guard swept");
        }

        reservation
    }

    fn commit(&self, key: &DedupKey, position_id: PositionId, now: Timestamp) {
        self.entries.insert(
            key.clone(),
            Slot {
                state: SlotState::Committed(position_id),
                at: now,
            },
        );
    }

    fn release(&self, key: &DedupKey) {
        self.entries
            .remove_if(key, |_, slot| matches!(slot.state, SlotState::Pending));
    }

    fn gc(&self, now: Timestamp) -> usize {
        let ttl = self.config.ttl_millis();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.expired(now, ttl));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn guard() -> InMemoryGuard {
        InMemoryGuard::new(GuardConfig::default())
    }

    fn t(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn reserve_commit_lifecycle() {
        let guard = guard();
        let key = DedupKey::explicit(HolderId(1), "abc");
        let id = PositionId::generate();

        assert_eq!(guard.reserve(&key, t(0)), Reservation::Fresh);
        assert_eq!(guard.reserve(&key, t(1)), Reservation::InFlight);

        guard.commit(&key, id, t(2));
        assert_eq!(guard.reserve(&key, t(3)), Reservation::Existing(id));
    }

    #[test]
    fn explicit_keys_are_scoped_to_holder() {
        let guard = guard();
        assert_eq!(guard.reserve(&DedupKey::explicit(HolderId(1), "k"), t(0)), Reservation::Fresh);
        assert_eq!(guard.reserve(&DedupKey::explicit(HolderId(2), "k"), t(0)), Reservation::Fresh);
    }

    #[test]
    fn release_frees_pending_only() {
        let guard = guard();
        let pending = DedupKey::explicit(HolderId(1), "p");
        let committed = DedupKey::explicit(HolderId(1), "c");
        let id = PositionId::generate();

        guard.reserve(&pending, t(0));
        guard.release(&pending);
        assert_eq!(guard.reserve(&pending, t(1)), Reservation::Fresh);

        guard.reserve(&committed, t(0));
        guard.commit(&committed, id, t(0));
        guard.release(&committed);
        assert_eq!(guard.reserve(&committed, t(1)), Reservation::Existing(id));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let guard = guard();
        let key = DedupKey::explicit(HolderId(1), "abc");
        guard.reserve(&key, t(0));
        guard.commit(&key, PositionId::generate(), t(0));

        assert!(matches!(guard.reserve(&key, t(299_999)), Reservation::Existing(_)));
        assert_eq!(guard.reserve(&key, t(300_000)), Reservation::Fresh);
    }

    #[test]
    fn stale_pending_reservation_is_reclaimed() {
        let guard = guard();
        let key = DedupKey::explicit(HolderId(1), "crashed");
        guard.reserve(&key, t(0));
        assert_eq!(guard.reserve(&key, t(300_000)), Reservation::Fresh);
    }

    #[test]
    fn fingerprint_buckets() {
        let a = DedupKey::fingerprint(HolderId(1), "BTCUSD", dec!(100), Direction::Long, t(10_000), 5_000);
        let b = DedupKey::fingerprint(HolderId(1), "BTCUSD", dec!(100.00), Direction::Long, t(14_999), 5_000);
        let c = DedupKey::fingerprint(HolderId(1), "BTCUSD", dec!(100), Direction::Long, t(15_000), 5_000);
        let d = DedupKey::fingerprint(HolderId(1), "BTCUSD", dec!(100), Direction::Short, t(10_000), 5_000);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn gc_evicts_expired() {
        let guard = guard();
        for i in 0..10 {
            guard.reserve(&DedupKey::explicit(HolderId(1), format!("k{i}")), t(0));
        }
        guard.reserve(&DedupKey::explicit(HolderId(1), "fresh"), t(250_000));

        assert_eq!(guard.gc(t(300_000)), 10);
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn store_bounds_itself() {
        let guard = InMemoryGuard::new(GuardConfig {
            ttl_secs: 1,
            bucket_secs: 5,
            max_entries: 4,
        });
        for i in 0..4 {
            guard.reserve(&DedupKey::explicit(HolderId(1), format!("old{i}")), t(0));
        }
        // the fifth reserve, after the ttl, crosses max_entries and sweeps the old ones
        guard.reserve(&DedupKey::explicit(HolderId(1), "new"), t(2_000));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn concurrent_reserve_has_one_winner() {
        let guard = Arc::new(guard());
        let key = DedupKey::explicit(HolderId(7), "race");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let key = key.clone();
                std::thread::spawn(move || guard.reserve(&key, t(0)))
            })
            .collect();

        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r == Reservation::Fresh)
            .count();
        assert_eq!(fresh, 1);
    }
}
