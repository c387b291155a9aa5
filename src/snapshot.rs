//! Snapshot store: bounded, most-recent-first pattern history per
//! (symbol, timeframe)
//!
//! The key map sits behind a `RwLock` and is only write-locked to insert a new
//! key. Each key owns a `Mutex`-guarded slot holding an `Arc<Snapshot>`, so
//! writers to different keys never wait on each other and a reader always gets
//! a complete snapshot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::timeframe::Timeframe;
use crate::{PatternEvent, Period};

/// Default number of events kept per key
pub const DEFAULT_RETENTION: usize = 20;

/// Pattern history of one (symbol, timeframe), newest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub history: Vec<PatternEvent>,
    /// Scan generation of the last applied write, 0 before any scan
    pub generation: u64,
}

impl Snapshot {
    pub fn empty(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            history: Vec::new(),
            generation: 0,
        }
    }

    /// Most recently detected pattern.
    pub fn latest(&self) -> Option<&PatternEvent> {
        self.history.first()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Outcome of an applied [`SnapshotStore::record_scan`]
#[derive(Debug, Clone)]
pub struct ScanWrite {
    pub snapshot: Arc<Snapshot>,
    /// Events new to the history that survived the retention cap
    pub added: usize,
}

type Key = (String, Timeframe);

struct Slot {
    snapshot: Arc<Snapshot>,
    last_generation: Option<u64>,
}

/// Thread-safe in-memory store of pattern snapshots
pub struct SnapshotStore {
    slots: RwLock<HashMap<Key, Arc<Mutex<Slot>>>>,
    retention: usize,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(Period::new_const(DEFAULT_RETENTION))
    }
}

impl SnapshotStore {
    pub fn new(retention: Period) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            retention: retention.get(),
        }
    }

    #[inline]
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Merge `events` into the key's history and publish the result.
    ///
    /// Events already present (same detector, kind, first evidence point and
    /// `detected_at`) are skipped, so re-recording an overlapping scan is a
    /// no-op.
    pub fn record(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        events: Vec<PatternEvent>,
    ) -> Arc<Snapshot> {
        let slot = self.slot(symbol, timeframe);
        let mut slot = slot.lock();
        let generation = slot.snapshot.generation;
        self.apply(&mut slot, generation, events).snapshot
    }

    /// Like [`record`](Self::record), but ignores writes from a scan older
    /// than the last one applied to this key.
    ///
    /// The `added` count is taken under the slot lock against the full
    /// pre-write history, so events the retention cap drops again are not
    /// counted.
    pub fn record_scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        generation: u64,
        events: Vec<PatternEvent>,
    ) -> Option<ScanWrite> {
        let slot = self.slot(symbol, timeframe);
        let mut slot = slot.lock();

        if let Some(last) = slot.last_generation {
            if generation < last {
                debug!(
                    symbol,
                    timeframe = %timeframe,
                    generation,
                    last_generation = last,
                    "Discarding stale scan result"
                );
                return None;
            }
        }

        slot.last_generation = Some(generation);
        Some(self.apply(&mut slot, generation, events))
    }

    /// Current snapshot, or an empty one for an unknown key.
    pub fn get(&self, symbol: &str, timeframe: Timeframe) -> Arc<Snapshot> {
        let key = (symbol.to_string(), timeframe);
        match self.slots.read().get(&key) {
            Some(slot) => Arc::clone(&slot.lock().snapshot),
            None => Arc::new(Snapshot::empty(symbol, timeframe)),
        }
    }

    /// All keys with a slot, sorted.
    pub fn keys(&self) -> Vec<(String, Timeframe)> {
        let mut keys: Vec<_> = self.slots.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot(&self, symbol: &str, timeframe: Timeframe) -> Arc<Mutex<Slot>> {
        let key = (symbol.to_string(), timeframe);
        if let Some(slot) = self.slots.read().get(&key) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write();
        let slot = slots.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(Slot {
                snapshot: Arc::new(Snapshot::empty(symbol, timeframe)),
                last_generation: None,
            }))
        });
        Arc::clone(slot)
    }

    fn apply(&self, slot: &mut Slot, generation: u64, events: Vec<PatternEvent>) -> ScanWrite {
        let current = &slot.snapshot;
        let known: HashSet<_> = current.history.iter().map(PatternEvent::identity).collect();
        let mut seen = known.clone();
        let mut history = current.history.clone();

        let offered = events.len();
        for event in events {
            if seen.insert(event.identity()) {
                history.push(event);
            }
        }

        // Stable: same-timestamp events keep classifier order
        history.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        history.truncate(self.retention);
        let added = history
            .iter()
            .filter(|e| !known.contains(&e.identity()))
            .count();

        let next = Arc::new(Snapshot {
            symbol: current.symbol.clone(),
            timeframe: current.timeframe,
            history,
            generation,
        });
        debug!(
            symbol = %next.symbol,
            timeframe = %next.timeframe,
            generation,
            offered,
            added,
            retained = next.history.len(),
            "Snapshot updated"
        );

        slot.snapshot = Arc::clone(&next);
        ScanWrite {
            snapshot: next,
            added,
        }
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PatternId, PatternKind, WavePoint};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(minute * 60, 0).unwrap()
    }

    fn event(start: i64, end: i64, kind: PatternKind) -> PatternEvent {
        PatternEvent {
            symbol: "BTC_USDT".into(),
            timeframe: Timeframe::MIN5,
            pattern_id: PatternId("THRESHOLD_BULL"),
            kind,
            detected_at: at(end),
            evidence: vec![
                WavePoint {
                    timestamp: at(start),
                    value: 0.6,
                },
                WavePoint {
                    timestamp: at(end),
                    value: 1.8,
                },
            ],
            suggested_position_hint: None,
        }
    }

    fn store(retention: usize) -> SnapshotStore {
        SnapshotStore::new(Period::new(retention).unwrap())
    }

    #[test]
    fn test_get_unknown_is_empty() {
        let s = store(5);
        let snap = s.get("ETH_USDT", Timeframe::MIN15);
        assert!(snap.is_empty());
        assert_eq!(snap.symbol, "ETH_USDT");
        assert_eq!(snap.generation, 0);
        assert!(s.is_empty());
    }

    #[test]
    fn test_record_orders_newest_first() {
        let s = store(10);
        let snap = s.record(
            "BTC_USDT",
            Timeframe::MIN5,
            vec![event(1, 2, PatternKind::Bull), event(5, 7, PatternKind::Bull)],
        );
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.latest().unwrap().detected_at, at(7));

        let snap = s.record("BTC_USDT", Timeframe::MIN5, vec![event(3, 4, PatternKind::Bull)]);
        let order: Vec<_> = snap.history.iter().map(|e| e.detected_at).collect();
        assert_eq!(order, vec![at(7), at(4), at(2)]);
    }

    #[test]
    fn test_record_is_idempotent() {
        let s = store(10);
        let events = vec![event(1, 2, PatternKind::Bull), event(1, 2, PatternKind::SlowBull)];
        let first = s.record("BTC_USDT", Timeframe::MIN5, events.clone());
        let second = s.record("BTC_USDT", Timeframe::MIN5, events);
        assert_eq!(first.history, second.history);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_retention_cap() {
        let s = store(3);
        let events = (0..10).map(|i| event(i * 2, i * 2 + 1, PatternKind::Bull)).collect();
        let snap = s.record("BTC_USDT", Timeframe::MIN5, events);
        assert_eq!(snap.len(), 3);
        // oldest dropped
        assert_eq!(snap.history.last().unwrap().detected_at, at(15));

        let snap = s.record("BTC_USDT", Timeframe::MIN5, vec![event(0, 1, PatternKind::Bull)]);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap.history.last().unwrap().detected_at, at(15));
    }

    #[test]
    fn test_added_counts_only_retained_events() {
        let s = store(1);
        let events: Vec<_> = (0..3).map(|i| event(i * 2, i * 2 + 1, PatternKind::Bull)).collect();

        let first = s.record_scan("BTC_USDT", Timeframe::MIN5, 1, events.clone()).unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(first.snapshot.len(), 1);

        // dropped events offered again are not new
        let second = s.record_scan("BTC_USDT", Timeframe::MIN5, 2, events).unwrap();
        assert_eq!(second.added, 0);

        let third = s
            .record_scan("BTC_USDT", Timeframe::MIN5, 3, vec![event(8, 9, PatternKind::Bull)])
            .unwrap();
        assert_eq!(third.added, 1);
        assert_eq!(third.snapshot.latest().unwrap().detected_at, at(9));
    }

    #[test]
    fn test_stale_generation_discarded() {
        let s = store(10);
        let applied = s.record_scan("BTC_USDT", Timeframe::MIN5, 3, vec![event(1, 2, PatternKind::Bull)]);
        assert_eq!(applied.unwrap().snapshot.generation, 3);

        let stale = s.record_scan("BTC_USDT", Timeframe::MIN5, 2, vec![event(5, 6, PatternKind::Bull)]);
        assert!(stale.is_none());
        let current = s.get("BTC_USDT", Timeframe::MIN5);
        assert_eq!(current.len(), 1);
        assert_eq!(current.generation, 3);

        // same generation is not stale
        assert!(s
            .record_scan("BTC_USDT", Timeframe::MIN5, 3, vec![])
            .is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let s = store(10);
        s.record("BTC_USDT", Timeframe::MIN5, vec![event(1, 2, PatternKind::Bull)]);
        s.record("BTC_USDT", Timeframe::MIN15, vec![]);
        s.record("ETH_USDT", Timeframe::MIN5, vec![]);

        assert_eq!(s.len(), 3);
        assert_eq!(
            s.keys(),
            vec![
                ("BTC_USDT".to_string(), Timeframe::MIN5),
                ("BTC_USDT".to_string(), Timeframe::MIN15),
                ("ETH_USDT".to_string(), Timeframe::MIN5),
            ]
        );
        assert_eq!(s.get("BTC_USDT", Timeframe::MIN5).len(), 1);
        assert!(s.get("BTC_USDT", Timeframe::MIN15).is_empty());
    }

    #[test]
    fn test_concurrent_record_same_key() {
        let s = store(1000);
        std::thread::scope(|scope| {
            for t in 0..8i64 {
                let s = &s;
                scope.spawn(move || {
                    for i in 0..50 {
                        let start = t * 1000 + i * 2;
                        s.record("BTC_USDT", Timeframe::MIN5, vec![event(start, start + 1, PatternKind::Bull)]);
                    }
                });
            }
        });

        let snap = s.get("BTC_USDT", Timeframe::MIN5);
        assert_eq!(snap.len(), 400);
        assert!(snap
            .history
            .windows(2)
            .all(|w| w[0].detected_at >= w[1].detected_at));
    }
}
