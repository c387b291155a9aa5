//! Scan orchestration
//!
//! One cycle fans out over every (symbol, timeframe) pair with bounded
//! concurrency: fetch base candles, derive the target timeframe, compute the
//! wave signal, classify, record into the snapshot store and publish. A failure
//! stays with its pair; the rest of the cycle carries on.
//!
//! The crate never schedules itself. A host timer calls
//! [`Scanner::scan_all`] every `scan_interval_secs`.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::snapshot::{Snapshot, SnapshotStore};
use crate::timeframe::{convert, CandleSeries, Timeframe};
use crate::{ErrorKind, PatternError, PatternEvent, Result, WaveEngine};

// ============================================================
// COLLABORATORS
// ============================================================

/// Source of base-resolution candles
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Candles of `symbol` at `base` resolution opening at or after `since`,
    /// oldest first.
    ///
    /// Fails with `CollaboratorUnavailable` or `RateLimited`.
    async fn fetch_candles(
        &self,
        symbol: &str,
        base: Timeframe,
        since: DateTime<Utc>,
    ) -> Result<CandleSeries>;
}

/// Fire-and-forget delivery of scan results to viewers
pub trait Transport: Send + Sync {
    fn publish(&self, symbol: &str, timeframe: Timeframe, snapshot: &Snapshot);
    fn publish_error(&self, symbol: &str, timeframe: Timeframe, kind: ErrorKind);
}

/// Message fanned out by [`BroadcastTransport`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanUpdate {
    Snapshot(Snapshot),
    Error {
        symbol: String,
        timeframe: Timeframe,
        kind: ErrorKind,
    },
}

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// [`Transport`] over a `tokio::sync::broadcast` channel.
///
/// Slow subscribers lag and lose the oldest updates; publishing never blocks.
#[derive(Debug, Clone)]
pub struct BroadcastTransport {
    tx: broadcast::Sender<ScanUpdate>,
}

impl Default for BroadcastTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanUpdate> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Transport for BroadcastTransport {
    fn publish(&self, _symbol: &str, _timeframe: Timeframe, snapshot: &Snapshot) {
        // No subscribers is not an error
        let _ = self.tx.send(ScanUpdate::Snapshot(snapshot.clone()));
    }

    fn publish_error(&self, symbol: &str, timeframe: Timeframe, kind: ErrorKind) {
        let _ = self.tx.send(ScanUpdate::Error {
            symbol: symbol.to_string(),
            timeframe,
            kind,
        });
    }
}

// ============================================================
// PLAN / SETTINGS
// ============================================================

/// A timeframe to scan and the native resolution it is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeframeSpec {
    pub target: Timeframe,
    /// Defaults to [`Timeframe::default_base`] of the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Timeframe>,
}

impl TimeframeSpec {
    pub fn new(target: Timeframe) -> Self {
        Self { target, base: None }
    }

    pub fn with_base(target: Timeframe, base: Timeframe) -> Self {
        Self {
            target,
            base: Some(base),
        }
    }

    pub fn base(&self) -> Timeframe {
        self.base.unwrap_or_else(|| self.target.default_base())
    }

    /// Target must be a whole multiple of the base and line up with UTC days.
    pub fn validate(&self) -> Result<()> {
        let base = self.base();
        if self.target.ratio_to(base).is_none() {
            return Err(PatternError::UnsupportedTimeframe {
                base,
                target: self.target,
            });
        }
        if !self.target.is_day_aligned() {
            return Err(PatternError::InvalidConfig(format!(
                "{} does not divide a day",
                self.target
            )));
        }
        Ok(())
    }
}

/// Runtime knobs of a scan cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Pairs in flight at once
    pub max_concurrency: usize,
    /// Base candles requested per fetch
    pub fetch_window: usize,
    pub fetch_timeout: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            fetch_window: 500,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

// ============================================================
// REPORT
// ============================================================

/// Result of one (symbol, timeframe) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairOutcome {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Events new to the store, or why the pair failed
    pub result: std::result::Result<usize, ErrorKind>,
}

/// Summary of a scan cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub generation: u64,
    /// Sorted by (symbol, timeframe)
    pub outcomes: Vec<PairOutcome>,
    /// True when another cycle was still running and this trigger did nothing
    pub skipped: bool,
}

impl ScanReport {
    fn skipped(generation: u64) -> Self {
        Self {
            generation,
            outcomes: Vec::new(),
            skipped: true,
        }
    }

    pub fn new_events(&self) -> usize {
        self.outcomes.iter().filter_map(|o| o.result.ok()).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PairOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

// ============================================================
// SCANNER
// ============================================================

/// Clears the running flag when a cycle ends, including on cancellation
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scanner<M: MarketData, T: Transport> {
    market: M,
    transport: T,
    engine: WaveEngine,
    store: Arc<SnapshotStore>,
    settings: ScanSettings,
    running: AtomicBool,
    generation: AtomicU64,
}

impl<M: MarketData, T: Transport> Scanner<M, T> {
    pub fn new(
        market: M,
        transport: T,
        engine: WaveEngine,
        store: Arc<SnapshotStore>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            market,
            transport,
            engine,
            store,
            settings,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn market(&self) -> &M {
        &self.market
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn engine(&self) -> &WaveEngine {
        &self.engine
    }

    /// Generation of the most recently started cycle, 0 before the first.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one scan cycle over every (symbol, timeframe) pair.
    ///
    /// Returns a skipped report without doing anything if a cycle is already
    /// in progress.
    pub async fn scan_all<S: AsRef<str>>(
        &self,
        symbols: &[S],
        timeframes: &[TimeframeSpec],
    ) -> ScanReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Scan cycle still running, skipping trigger");
            return ScanReport::skipped(self.generation());
        }
        let _guard = CycleGuard(&self.running);

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let started = Instant::now();
        info!(
            generation,
            symbols = symbols.len(),
            timeframes = timeframes.len(),
            "Scan cycle started"
        );

        let pairs: Vec<(String, TimeframeSpec)> = symbols
            .iter()
            .flat_map(|symbol| timeframes.iter().map(|spec| (symbol.as_ref().to_string(), *spec)))
            .collect();
        let mut outcomes: Vec<PairOutcome> = stream::iter(pairs)
            .map(|(symbol, spec)| async move { self.scan_pair(generation, &symbol, spec).await })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| {
            (a.symbol.as_str(), a.timeframe).cmp(&(b.symbol.as_str(), b.timeframe))
        });

        let report = ScanReport {
            generation,
            outcomes,
            skipped: false,
        };
        info!(
            generation,
            pairs = report.outcomes.len(),
            failed = report.failures().count(),
            new_events = report.new_events(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scan cycle finished"
        );
        report
    }

    async fn scan_pair(&self, generation: u64, symbol: &str, spec: TimeframeSpec) -> PairOutcome {
        let timeframe = spec.target;
        let run = AssertUnwindSafe(self.run_pair(generation, symbol, spec))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(PatternError::InternalInvariantViolation(format!(
                    "panic while scanning {symbol} {timeframe}: {}",
                    panic_message(panic.as_ref())
                )))
            });
        let result = match run {
            Ok(added) => {
                debug!(symbol, timeframe = %timeframe, generation, added, "Pair scanned");
                Ok(added)
            }
            Err(e) => {
                if let PatternError::InternalInvariantViolation(_) = e {
                    error!(symbol, timeframe = %timeframe, generation, error = %e, "Invariant violated while scanning pair");
                } else {
                    warn!(
                        symbol,
                        timeframe = %timeframe,
                        generation,
                        error = %e,
                        transient = e.is_transient(),
                        "Pair scan failed"
                    );
                }
                let notify = || self.transport.publish_error(symbol, timeframe, e.kind());
                if catch_unwind(AssertUnwindSafe(notify)).is_err() {
                    error!(symbol, timeframe = %timeframe, generation, "Transport panicked while publishing error");
                }
                Err(e.kind())
            }
        };
        PairOutcome {
            symbol: symbol.to_string(),
            timeframe,
            result,
        }
    }

    async fn run_pair(&self, generation: u64, symbol: &str, spec: TimeframeSpec) -> Result<usize> {
        spec.validate()?;
        let base = spec.base();
        let target = spec.target;

        let since = self.fetch_since(base);
        let fetch = self.market.fetch_candles(symbol, base, since);
        let series = match tokio::time::timeout(self.settings.fetch_timeout, fetch).await {
            Ok(fetched) => fetched?,
            Err(_) => {
                return Err(PatternError::CollaboratorUnavailable(format!(
                    "fetching {symbol} {base} timed out after {:?}",
                    self.settings.fetch_timeout
                )))
            }
        };
        if series.symbol() != symbol || series.timeframe() != base {
            return Err(PatternError::InternalInvariantViolation(format!(
                "asked for {symbol} {base}, got {} {}",
                series.symbol(),
                series.timeframe()
            )));
        }

        let events = self.classify(&series, target)?;

        match self.store.record_scan(symbol, target, generation, events) {
            Some(write) => {
                self.transport.publish(symbol, target, &write.snapshot);
                Ok(write.added)
            }
            // A newer cycle already wrote this key
            None => Ok(0),
        }
    }

    fn classify(&self, series: &CandleSeries, target: Timeframe) -> Result<Vec<PatternEvent>> {
        let derived = convert(series, target)?;
        Ok(self.engine.analyze(&derived)?.events)
    }

    /// Start of the fetch window: `fetch_window` base candles before the
    /// current base window.
    fn fetch_since(&self, base: Timeframe) -> DateTime<Utc> {
        let now = base.window_start(Utc::now());
        let span = i64::from(base.minutes()).saturating_mul(self.settings.fetch_window as i64);
        TimeDelta::try_minutes(span)
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_default_base() {
        let spec = TimeframeSpec::new(Timeframe::from_minutes(180).unwrap());
        assert_eq!(spec.base(), Timeframe::MIN60);
        assert!(spec.validate().is_ok());

        let spec = TimeframeSpec::with_base(Timeframe::from_minutes(45).unwrap(), Timeframe::MIN1);
        assert_eq!(spec.base(), Timeframe::MIN1);
    }

    #[test]
    fn test_spec_validation() {
        let spec = TimeframeSpec::with_base(Timeframe::from_minutes(90).unwrap(), Timeframe::MIN60);
        assert!(matches!(
            spec.validate(),
            Err(PatternError::UnsupportedTimeframe { .. })
        ));

        let spec = TimeframeSpec::new(Timeframe::from_minutes(7).unwrap());
        assert!(matches!(spec.validate(), Err(PatternError::InvalidConfig(_))));
    }

    #[test]
    fn test_spec_serde() {
        let spec: TimeframeSpec = serde_json::from_str(r#"{"target":"Hour3"}"#).unwrap();
        assert_eq!(spec, TimeframeSpec::new(Timeframe::from_minutes(180).unwrap()));
        let spec: TimeframeSpec =
            serde_json::from_str(r#"{"target":"Hour3","base":"Min15"}"#).unwrap();
        assert_eq!(spec.base(), Timeframe::MIN15);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_broadcast_transport() {
        let transport = BroadcastTransport::new(8);
        // publishing without subscribers is fine
        transport.publish_error("X", Timeframe::MIN5, ErrorKind::RateLimited);

        let mut rx = transport.subscribe();
        assert_eq!(transport.receiver_count(), 1);
        transport.publish("X", Timeframe::MIN5, &Snapshot::empty("X", Timeframe::MIN5));
        transport.publish_error("X", Timeframe::MIN5, ErrorKind::CollaboratorUnavailable);

        match rx.recv().await.unwrap() {
            ScanUpdate::Snapshot(s) => assert_eq!(s.symbol, "X"),
            other => panic!("unexpected update {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ScanUpdate::Error { kind, .. } => assert_eq!(kind, ErrorKind::CollaboratorUnavailable),
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn test_update_serializes_tagged() {
        let update = ScanUpdate::Error {
            symbol: "X".into(),
            timeframe: Timeframe::MIN5,
            kind: ErrorKind::RateLimited,
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","symbol":"X","timeframe":"Min5","kind":"rate_limited"}"#
        );
    }
}
