//! Scan cycle tests against in-memory market data and transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use wavescan::prelude::*;

// ============================================================
// MOCKS
// ============================================================

#[derive(Clone)]
enum Feed {
    Closes(Vec<f64>),
    Fail(PatternError),
    Delay(Duration, Vec<f64>),
    Panic,
}

struct MockMarket {
    feeds: HashMap<String, Feed>,
    calls: AtomicUsize,
}

impl MockMarket {
    fn new(feeds: impl IntoIterator<Item = (&'static str, Feed)>) -> Self {
        Self {
            feeds: feeds.into_iter().map(|(s, f)| (s.to_string(), f)).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

fn series(symbol: &str, base: Timeframe, closes: &[f64]) -> CandleSeries {
    let start = Utc.timestamp_opt(0, 0).unwrap();
    let candles = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle::new(start + base.duration() * i as i32, c, c + 0.5, c - 0.5, c, 10.0))
        .collect();
    CandleSeries::new(symbol, base, candles).unwrap()
}

#[async_trait]
impl MarketData for MockMarket {
    async fn fetch_candles(
        &self,
        symbol: &str,
        base: Timeframe,
        _since: DateTime<Utc>,
    ) -> Result<CandleSeries> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.feeds.get(symbol) {
            Some(Feed::Closes(closes)) => Ok(series(symbol, base, closes)),
            Some(Feed::Fail(e)) => Err(e.clone()),
            Some(Feed::Delay(delay, closes)) => {
                tokio::time::sleep(*delay).await;
                Ok(series(symbol, base, closes))
            }
            Some(Feed::Panic) => panic!("feed for {symbol} is corrupt"),
            None => Err(PatternError::CollaboratorUnavailable(format!("no feed for {symbol}"))),
        }
    }
}

#[derive(Default)]
struct RecordingTransport {
    published: Mutex<Vec<(String, Timeframe, usize)>>,
    errors: Mutex<Vec<(String, Timeframe, ErrorKind)>>,
}

impl Transport for RecordingTransport {
    fn publish(&self, symbol: &str, timeframe: Timeframe, snapshot: &Snapshot) {
        self.published
            .lock()
            .push((symbol.to_string(), timeframe, snapshot.len()));
    }

    fn publish_error(&self, symbol: &str, timeframe: Timeframe, kind: ErrorKind) {
        self.errors.lock().push((symbol.to_string(), timeframe, kind));
    }
}

/// Panics on lines of one particular length
struct TrapDetector;

const TRAP_LEN: usize = 77;

impl WaveDetector for TrapDetector {
    fn id(&self) -> PatternId {
        PatternId("TRAP")
    }

    fn min_points(&self) -> usize {
        1
    }

    fn detect(&self, line: &WaveLine<'_>) -> Vec<Detection> {
        if line.len() == TRAP_LEN {
            panic!("trap sprung");
        }
        Vec::new()
    }
}

// ============================================================
// HELPERS
// ============================================================

const SCENARIO_CLOSES: [f64; 17] = [
    100.0, 102.0, 104.0, 103.0, 101.0, 99.0, 97.0, 99.0, 102.0, 105.0, 107.0, 108.0, 108.0, 107.0,
    106.0, 106.0, 106.0,
];

fn wiggle(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 + (i as f64 / 4.0).sin() * 4.0).collect()
}

fn engine() -> WaveEngine {
    let params = ThresholdParams {
        entry: 1.0,
        confirm: 2.0,
        max_lookahead: Period::new(3).unwrap(),
        ..ThresholdParams::default()
    };
    EngineBuilder::new()
        .indicator(WaveIndicator::new(Period::new(3).unwrap(), Period::new(5).unwrap()))
        .add(ThresholdDetector::new(Direction::Bullish, params.clone()))
        .add(ThresholdDetector::new(Direction::Bearish, params))
        .add_custom(TrapDetector)
        .build()
        .unwrap()
}

fn scanner(
    market: MockMarket,
    settings: ScanSettings,
) -> Scanner<MockMarket, RecordingTransport> {
    setup_logging(Some("debug"), false);
    Scanner::new(
        market,
        RecordingTransport::default(),
        engine(),
        Arc::new(SnapshotStore::default()),
        settings,
    )
}

fn minutely() -> Vec<TimeframeSpec> {
    vec![TimeframeSpec::new(Timeframe::MIN1)]
}

fn outcome<'a>(report: &'a ScanReport, symbol: &str) -> &'a PairOutcome {
    report
        .outcomes
        .iter()
        .find(|o| o.symbol == symbol)
        .unwrap()
}

// ============================================================
// TESTS
// ============================================================

#[tokio::test]
async fn test_failures_stay_with_their_pair() {
    let market = MockMarket::new([
        ("OK", Feed::Closes(SCENARIO_CLOSES.to_vec())),
        ("DOWN", Feed::Fail(PatternError::CollaboratorUnavailable("exchange 503".into()))),
        ("SLOWDOWN", Feed::Fail(PatternError::RateLimited { retry_after_secs: Some(30) })),
        ("TINY", Feed::Closes(vec![100.0, 101.0])),
    ]);
    let scanner = scanner(market, ScanSettings::default());

    let report = scanner
        .scan_all(&["OK", "DOWN", "SLOWDOWN", "TINY"], &minutely())
        .await;

    assert!(!report.skipped);
    assert_eq!(report.generation, 1);
    let symbols: Vec<_> = report.outcomes.iter().map(|o| o.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["DOWN", "OK", "SLOWDOWN", "TINY"]);

    assert_eq!(outcome(&report, "OK").result, Ok(3));
    assert_eq!(outcome(&report, "DOWN").result, Err(ErrorKind::CollaboratorUnavailable));
    assert_eq!(outcome(&report, "SLOWDOWN").result, Err(ErrorKind::RateLimited));
    assert_eq!(outcome(&report, "TINY").result, Err(ErrorKind::InsufficientData));
    assert_eq!(report.failures().count(), 3);
    assert_eq!(report.new_events(), 3);

    let transport = scanner.transport();
    assert_eq!(
        *transport.published.lock(),
        vec![("OK".to_string(), Timeframe::MIN1, 3)]
    );
    assert_eq!(transport.errors.lock().len(), 3);

    let snapshot = scanner.store().get("OK", Timeframe::MIN1);
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.generation, 1);
    assert_eq!(snapshot.latest().unwrap().detected_at.timestamp(), 9 * 60);
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let market = MockMarket::new([("OK", Feed::Closes(SCENARIO_CLOSES.to_vec()))]);
    let scanner = scanner(market, ScanSettings::default());

    let first = scanner.scan_all(&["OK"], &minutely()).await;
    let before = scanner.store().get("OK", Timeframe::MIN1);
    let second = scanner.scan_all(&["OK"], &minutely()).await;
    let after = scanner.store().get("OK", Timeframe::MIN1);

    assert_eq!(first.new_events(), 3);
    assert_eq!(second.generation, 2);
    assert_eq!(outcome(&second, "OK").result, Ok(0));
    assert_eq!(before.history, after.history);
    assert_eq!(after.generation, 2);
    // every successful pair is republished
    assert_eq!(scanner.transport().published.lock().len(), 2);
}

#[tokio::test]
async fn test_derived_timeframe_from_base() {
    let target = Timeframe::from_minutes(180).unwrap();
    let market = MockMarket::new([
        ("TWO_HOURS", Feed::Closes(vec![100.0, 101.0])),
        ("LONG", Feed::Closes(wiggle(3 * 40))),
    ]);
    let scanner = scanner(market, ScanSettings::default());

    let report = scanner
        .scan_all(&["TWO_HOURS", "LONG"], &[TimeframeSpec::new(target)])
        .await;

    assert_eq!(outcome(&report, "TWO_HOURS").result, Err(ErrorKind::InsufficientData));
    assert!(outcome(&report, "LONG").result.is_ok());
    assert_eq!(
        *scanner.transport().errors.lock(),
        vec![("TWO_HOURS".to_string(), target, ErrorKind::InsufficientData)]
    );
    assert_eq!(scanner.store().keys(), vec![("LONG".to_string(), target)]);
}

#[tokio::test]
async fn test_unsupported_timeframe_pair() {
    let market = MockMarket::new([("OK", Feed::Closes(SCENARIO_CLOSES.to_vec()))]);
    let scanner = scanner(market, ScanSettings::default());
    let spec = TimeframeSpec::with_base(Timeframe::from_minutes(90).unwrap(), Timeframe::MIN60);

    let report = scanner.scan_all(&["OK"], &[spec]).await;

    assert_eq!(outcome(&report, "OK").result, Err(ErrorKind::UnsupportedTimeframe));
    // rejected before fetching
    assert_eq!(scanner.market().calls.load(Ordering::SeqCst), 0);
    assert_eq!(scanner.store().len(), 0);
}

#[tokio::test]
async fn test_panic_becomes_invariant_violation() {
    let market = MockMarket::new([
        ("TRAP", Feed::Closes(wiggle(TRAP_LEN))),
        ("OK", Feed::Closes(SCENARIO_CLOSES.to_vec())),
    ]);
    let scanner = scanner(market, ScanSettings::default());

    let report = scanner.scan_all(&["TRAP", "OK"], &minutely()).await;

    assert_eq!(
        outcome(&report, "TRAP").result,
        Err(ErrorKind::InternalInvariantViolation)
    );
    assert_eq!(outcome(&report, "OK").result, Ok(3));
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn test_panicking_market_is_contained() {
    let market = MockMarket::new([
        ("BOOM", Feed::Panic),
        ("OK", Feed::Closes(SCENARIO_CLOSES.to_vec())),
    ]);
    let scanner = scanner(market, ScanSettings::default());

    let report = scanner.scan_all(&["OK", "BOOM"], &minutely()).await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(
        outcome(&report, "BOOM").result,
        Err(ErrorKind::InternalInvariantViolation)
    );
    assert_eq!(outcome(&report, "OK").result, Ok(3));
    assert_eq!(
        *scanner.transport().errors.lock(),
        vec![("BOOM".to_string(), Timeframe::MIN1, ErrorKind::InternalInvariantViolation)]
    );
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn test_new_events_ignore_retention_drops() {
    let market = MockMarket::new([("OK", Feed::Closes(SCENARIO_CLOSES.to_vec()))]);
    let scanner = Scanner::new(
        market,
        RecordingTransport::default(),
        engine(),
        Arc::new(SnapshotStore::new(Period::new(1).unwrap())),
        ScanSettings::default(),
    );

    let first = scanner.scan_all(&["OK"], &minutely()).await;
    let second = scanner.scan_all(&["OK"], &minutely()).await;

    assert_eq!(outcome(&first, "OK").result, Ok(1));
    assert_eq!(outcome(&second, "OK").result, Ok(0));
    assert_eq!(second.new_events(), 0);
    assert_eq!(scanner.store().get("OK", Timeframe::MIN1).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cycles_run_as_spawned_tasks() {
    let market = MockMarket::new([(
        "SLOW",
        Feed::Delay(Duration::from_secs(5), SCENARIO_CLOSES.to_vec()),
    )]);
    let scanner = Arc::new(scanner(market, ScanSettings::default()));

    let spawn_cycle = |scanner: Arc<Scanner<MockMarket, RecordingTransport>>| {
        let symbols = vec!["SLOW".to_string()];
        let plan = minutely();
        tokio::spawn(async move { scanner.scan_all(&symbols, &plan).await })
    };
    let first = spawn_cycle(Arc::clone(&scanner));
    let second = spawn_cycle(Arc::clone(&scanner));

    let reports = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(reports.iter().filter(|r| r.skipped).count(), 1);
    let ran = reports.iter().find(|r| !r.skipped).unwrap();
    assert_eq!(outcome(ran, "SLOW").result, Ok(3));
    assert_eq!(scanner.generation(), 1);
    assert!(!scanner.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout() {
    let market = MockMarket::new([(
        "HUNG",
        Feed::Delay(Duration::from_secs(60), SCENARIO_CLOSES.to_vec()),
    )]);
    let settings = ScanSettings {
        fetch_timeout: Duration::from_secs(10),
        ..ScanSettings::default()
    };
    let scanner = scanner(market, settings);

    let report = scanner.scan_all(&["HUNG"], &minutely()).await;

    assert_eq!(
        outcome(&report, "HUNG").result,
        Err(ErrorKind::CollaboratorUnavailable)
    );
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_trigger_is_skipped() {
    let market = MockMarket::new([(
        "SLOW",
        Feed::Delay(Duration::from_secs(5), SCENARIO_CLOSES.to_vec()),
    )]);
    let scanner = scanner(market, ScanSettings::default());
    let plan = minutely();

    let (first, second) = tokio::join!(
        scanner.scan_all(&["SLOW"], &plan),
        scanner.scan_all(&["SLOW"], &plan),
    );

    assert!(!first.skipped);
    assert_eq!(outcome(&first, "SLOW").result, Ok(3));
    assert!(second.skipped);
    assert!(second.outcomes.is_empty());
    assert_eq!(scanner.generation(), 1);

    // the flag is released once the cycle ends
    let third = scanner.scan_all(&["SLOW"], &plan).await;
    assert!(!third.skipped);
    assert_eq!(third.generation, 2);
}

#[tokio::test]
async fn test_newer_generation_wins() {
    let market = MockMarket::new([("OK", Feed::Closes(SCENARIO_CLOSES.to_vec()))]);
    let scanner = scanner(market, ScanSettings::default());

    // a later cycle already wrote this key
    scanner
        .store()
        .record_scan("OK", Timeframe::MIN1, 10, Vec::new());

    let report = scanner.scan_all(&["OK"], &minutely()).await;

    assert_eq!(outcome(&report, "OK").result, Ok(0));
    assert!(scanner.transport().published.lock().is_empty());
    let snapshot = scanner.store().get("OK", Timeframe::MIN1);
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.generation, 10);
}

#[tokio::test]
async fn test_bounded_concurrency_covers_every_pair() {
    let symbols: Vec<String> = (0..12).map(|i| format!("SYM{i:02}")).collect();
    let feeds: HashMap<String, Feed> = symbols
        .iter()
        .map(|s| (s.clone(), Feed::Closes(SCENARIO_CLOSES.to_vec())))
        .collect();
    let market = MockMarket {
        feeds,
        calls: AtomicUsize::new(0),
    };
    let settings = ScanSettings {
        max_concurrency: 3,
        ..ScanSettings::default()
    };
    let scanner = scanner(market, settings);
    let plan = vec![
        TimeframeSpec::new(Timeframe::MIN1),
        TimeframeSpec::with_base(Timeframe::MIN5, Timeframe::MIN1),
    ];

    let report = scanner.scan_all(&symbols, &plan).await;

    assert_eq!(report.outcomes.len(), 24);
    assert_eq!(scanner.store().len(), 12);
    // 17 one-minute candles only make 3 five-minute candles
    assert!(report
        .outcomes
        .iter()
        .filter(|o| o.timeframe == Timeframe::MIN5)
        .all(|o| o.result == Err(ErrorKind::InsufficientData)));
}

#[tokio::test]
async fn test_broadcast_subscribers_receive_updates() {
    setup_logging(Some("debug"), false);
    let market = MockMarket::new([
        ("OK", Feed::Closes(SCENARIO_CLOSES.to_vec())),
        ("DOWN", Feed::Fail(PatternError::CollaboratorUnavailable("gone".into()))),
    ]);
    let transport = BroadcastTransport::new(16);
    let mut rx = transport.subscribe();
    let scanner = Scanner::new(
        market,
        transport,
        engine(),
        Arc::new(SnapshotStore::default()),
        ScanSettings {
            max_concurrency: 1,
            ..ScanSettings::default()
        },
    );

    scanner.scan_all(&["OK", "DOWN"], &minutely()).await;

    let mut snapshots = 0;
    let mut errors = 0;
    while let Ok(update) = rx.try_recv() {
        match update {
            ScanUpdate::Snapshot(snapshot) => {
                assert_eq!(snapshot.symbol, "OK");
                assert_eq!(snapshot.len(), 3);
                snapshots += 1;
            }
            ScanUpdate::Error { symbol, kind, .. } => {
                assert_eq!(symbol, "DOWN");
                assert_eq!(kind, ErrorKind::CollaboratorUnavailable);
                errors += 1;
            }
        }
    }
    assert_eq!((snapshots, errors), (1, 1));
}

#[tokio::test]
async fn test_scanner_from_config() {
    let config = ScannerConfig::from_toml_str(
        r#"
        symbols = ["OK"]
        timeframes = [{ target = "Min1" }, { target = "Min90", base = "Min60" }]

        [indicator]
        fast_period = 3
        slow_period = 5

        [classifier]
        entry = 1.0
        confirm = 2.0
        max_lookahead = 3
        "#,
    )
    .unwrap();
    let (plan, rejected) = config.timeframe_plan();
    assert_eq!(plan.len(), 1);
    assert_eq!(rejected.len(), 1);

    let market = MockMarket::new([("OK", Feed::Closes(SCENARIO_CLOSES.to_vec()))]);
    let scanner = Scanner::new(
        market,
        RecordingTransport::default(),
        config.build_engine().unwrap(),
        Arc::new(config.build_store()),
        config.scan_settings(),
    );

    let report = scanner.scan_all(&config.symbols, &plan).await;
    assert_eq!(outcome(&report, "OK").result, Ok(3));
    assert_eq!(scanner.engine().indicator().slow_period.get(), 5);
}
