//! # wavescan - multi-timeframe wave pattern scanner
//!
//! Derives fast and slow EMA "waves" from candle series at any timeframe,
//! classifies bull/bear wave formations in them and keeps a bounded history of
//! detected patterns per (symbol, timeframe).
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use wavescan::prelude::*;
//!
//! let start = Utc.timestamp_opt(0, 0).unwrap();
//! let candles: Vec<Candle> = (0..120)
//!     .map(|i| {
//!         let price = 100.0 + (i as f64 / 6.0).sin() * 3.0;
//!         Candle::new(start + Duration::minutes(i), price, price + 0.5, price - 0.5, price, 1.0)
//!     })
//!     .collect();
//! let series = CandleSeries::new("BTC_USDT", Timeframe::MIN1, candles).unwrap();
//!
//! // Engine with bull/bear threshold and formation detectors
//! let engine = EngineBuilder::new()
//!     .with_all_defaults()
//!     .build()
//!     .unwrap();
//!
//! let analysis = engine.analyze(&series).unwrap();
//! for event in &analysis.events {
//!     println!("{} {:?} at {}", event.symbol, event.kind, event.detected_at);
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod detectors;
pub mod indicator;
pub mod logging;
pub mod params;
pub mod scanner;
pub mod snapshot;
pub mod timeframe;

pub use indicator::{WaveIndicator, WaveLine, WaveSignal};
pub use timeframe::{Candle, CandleSeries, Timeframe};

pub mod prelude {
    pub use crate::{
        // Parallel
        analyze_parallel,
        // Config
        config::{ClassifierConfig, ScannerConfig},
        logging::{setup_logging, LoggingConfig},
        // Detectors
        detectors::*,
        // Indicator
        indicator::{Crossover, Ema, PriceSource, WaveIndicator, WaveLine, WaveSignal, WaveTransform},
        // Parameters
        params::{get_level, get_period, ParamMeta, ParamType, ParameterizedDetector},
        // Scanner
        scanner::{
            BroadcastTransport, MarketData, PairOutcome, ScanReport, ScanSettings, ScanUpdate, Scanner,
            TimeframeSpec, Transport,
        },
        // Store
        snapshot::{ScanWrite, Snapshot, SnapshotStore},
        // Timeframes
        timeframe::{convert, Candle, CandleSeries, Timeframe},
        Analysis,
        AnalysisError,
        AnalysisResult,
        // Engine
        BuiltinDetector,
        Detection,
        Direction,
        EngineBuilder,
        // Errors
        ErrorKind,
        OHLCVExt,
        PatternError,
        PatternEvent,
        PatternId,
        PatternKind,
        Period,
        PositionHint,
        Result,
        WaveDetector,
        WaveEngine,
        WaveKind,
        WavePoint,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised while converting, computing or classifying wave data
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} {what}, got {got}")]
    InsufficientData {
        what: &'static str,
        need: usize,
        got: usize,
    },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Cannot derive {target} from {base} candles")]
    UnsupportedTimeframe { base: Timeframe, target: Timeframe },

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    #[error("Rate limited, retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

/// Coarse error classification reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidConfig,
    InvalidData,
    InsufficientData,
    UnsupportedTimeframe,
    CollaboratorUnavailable,
    RateLimited,
    InternalInvariantViolation,
}

impl PatternError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatternError::InvalidValue(_)
            | PatternError::OutOfRange { .. }
            | PatternError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            PatternError::InvalidOHLCV { .. } => ErrorKind::InvalidData,
            PatternError::InsufficientData { .. } => ErrorKind::InsufficientData,
            PatternError::UnsupportedTimeframe { .. } => ErrorKind::UnsupportedTimeframe,
            PatternError::CollaboratorUnavailable(_) => ErrorKind::CollaboratorUnavailable,
            PatternError::RateLimited { .. } => ErrorKind::RateLimited,
            PatternError::InternalInvariantViolation(_) => ErrorKind::InternalInvariantViolation,
        }
    }

    /// True when the next scan cycle may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InsufficientData | ErrorKind::CollaboratorUnavailable | ErrorKind::RateLimited
        )
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    /// Open time in Unix milliseconds, if known
    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// (high + low + close) / 3
    #[inline]
    fn typical_price(&self) -> f64 {
        (self.high() + self.low() + self.close()) / 3.0
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.range() < 0.0 {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// PATTERN EVENTS
// ============================================================

/// Unique identifier for a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId(pub &'static str);

impl PatternId {
    /// Returns the string identifier
    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Serialize for PatternId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.0)
    }
}

/// Direction/bias of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    /// +1 for bullish, -1 for bearish. Multiplying a wave value by the sign
    /// lets one code path handle both directions.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }
}

/// Which wave of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveKind {
    Fast,
    Slow,
}

/// Pattern label: direction combined with the wave it formed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Bull,
    SlowBull,
    Bear,
    SlowBear,
}

impl PatternKind {
    pub fn new(direction: Direction, wave: WaveKind) -> Self {
        match (direction, wave) {
            (Direction::Bullish, WaveKind::Fast) => PatternKind::Bull,
            (Direction::Bullish, WaveKind::Slow) => PatternKind::SlowBull,
            (Direction::Bearish, WaveKind::Fast) => PatternKind::Bear,
            (Direction::Bearish, WaveKind::Slow) => PatternKind::SlowBear,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            PatternKind::Bull | PatternKind::SlowBull => Direction::Bullish,
            PatternKind::Bear | PatternKind::SlowBear => Direction::Bearish,
        }
    }

    pub fn wave(self) -> WaveKind {
        match self {
            PatternKind::Bull | PatternKind::Bear => WaveKind::Fast,
            PatternKind::SlowBull | PatternKind::SlowBear => WaveKind::Slow,
        }
    }
}

/// Suggested position size bucket; advisory only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionHint {
    Small,
    Normal,
    Large,
}

/// A (timestamp, wave value) pair taken from a signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WavePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// A classified wave pattern
///
/// `detected_at` is the timestamp of the last evidence point, so classifying
/// the same signal twice yields identical events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub pattern_id: PatternId,
    pub kind: PatternKind,
    pub detected_at: DateTime<Utc>,
    pub evidence: Vec<WavePoint>,
    pub suggested_position_hint: Option<PositionHint>,
}

impl PatternEvent {
    /// Timestamp of the first evidence point.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.evidence
            .first()
            .map(|p| p.timestamp)
            .unwrap_or(self.detected_at)
    }

    /// Two events with the same identity describe the same pattern instance.
    pub fn identity(&self) -> (PatternId, PatternKind, DateTime<Utc>, DateTime<Utc>) {
        (self.pattern_id, self.kind, self.started_at(), self.detected_at)
    }
}

// ============================================================
// WAVE DETECTOR TRAIT
// ============================================================

/// Raw detector output: indices into the wave line, strictly increasing
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub direction: Direction,
    pub indices: Vec<usize>,
    pub position_hint: Option<PositionHint>,
}

/// A detector scanning one wave line for pattern instances
///
/// Detectors receive `None` for warm-up points and must never return them
/// as evidence.
pub trait WaveDetector: Send + Sync {
    fn id(&self) -> PatternId;

    /// Minimum number of defined wave points the detector needs.
    fn min_points(&self) -> usize;

    fn detect(&self, line: &WaveLine<'_>) -> Vec<Detection>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - fast path via enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl WaveDetector for BuiltinDetector {
            #[inline]
            fn id(&self) -> PatternId {
                match self {
                    $(Self::$variant(d) => WaveDetector::id(d)),*
                }
            }

            #[inline]
            fn min_points(&self) -> usize {
                match self {
                    $(Self::$variant(d) => WaveDetector::min_points(d)),*
                }
            }

            #[inline]
            fn detect(&self, line: &WaveLine<'_>) -> Vec<Detection> {
                match self {
                    $(Self::$variant(d) => WaveDetector::detect(d, line)),*
                }
            }

            fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => WaveDetector::validate_config(d)),*
                }
            }
        }

        $(
            impl From<$detector> for BuiltinDetector {
                fn from(d: $detector) -> Self {
                    Self::$variant(d)
                }
            }
        )*
    };
}

define_builtin_detectors! {
    Threshold(ThresholdDetector),
    Formation(FormationDetector),
}

// ============================================================
// WAVE ENGINE
// ============================================================

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub validate_data: bool,
    pub kind_filter: Option<Vec<PatternKind>>,
    pub pattern_filter: Option<Vec<PatternId>>,
}

/// Wave signal and the patterns classified from it
#[derive(Debug, Clone)]
pub struct Analysis {
    pub signal: WaveSignal,
    pub events: Vec<PatternEvent>,
}

/// Indicator plus detectors: turns a candle series into pattern events
pub struct WaveEngine {
    indicator: WaveIndicator,
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn WaveDetector>>,
    config: EngineConfig,
}

impl std::fmt::Debug for WaveEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveEngine")
            .field("indicator", &self.indicator)
            .field("builtin", &self.builtin)
            .field("custom", &self.custom.len())
            .field("config", &self.config)
            .finish()
    }
}

impl WaveEngine {
    pub fn indicator(&self) -> &WaveIndicator {
        &self.indicator
    }

    /// Defined slow-wave points required before classification runs.
    pub fn min_points(&self) -> usize {
        self.builtin
            .iter()
            .map(|d| d.min_points())
            .chain(self.custom.iter().map(|d| d.min_points()))
            .max()
            .unwrap_or(1)
    }

    /// Compute the wave signal for a series.
    pub fn compute_signal(&self, series: &CandleSeries) -> Result<WaveSignal> {
        if self.config.validate_data {
            validate_candles(series)?;
        }
        self.indicator.compute(series)
    }

    /// Classify a wave signal.
    ///
    /// Events are ordered by `detected_at`, then fast wave before slow wave,
    /// then by detector registration order.
    pub fn classify(&self, signal: &WaveSignal) -> Result<Vec<PatternEvent>> {
        let need = self.min_points();
        let got = signal.slow().iter().filter(|v| v.is_some()).count();
        if got < need {
            return Err(PatternError::InsufficientData {
                what: "defined wave points",
                need,
                got,
            });
        }

        let mut ranked: Vec<(WaveKind, usize, PatternEvent)> = Vec::new();
        for wave in [WaveKind::Fast, WaveKind::Slow] {
            let line = signal.line(wave);

            // Fast path: builtin detectors (enum dispatch, no vtable)
            for (order, detector) in self.builtin.iter().enumerate() {
                for detection in detector.detect(&line) {
                    let event = build_event(signal, &line, detector.id(), detection)?;
                    if self.should_include(&event) {
                        ranked.push((wave, order, event));
                    }
                }
            }

            // Slow path: custom detectors (vtable)
            let offset = self.builtin.len();
            for (order, detector) in self.custom.iter().enumerate() {
                for detection in detector.detect(&line) {
                    let event = build_event(signal, &line, detector.id(), detection)?;
                    if self.should_include(&event) {
                        ranked.push((wave, offset + order, event));
                    }
                }
            }
        }

        // Stable: detections of one detector keep their scan order
        ranked.sort_by(|a, b| {
            a.2.detected_at
                .cmp(&b.2.detected_at)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });
        Ok(ranked.into_iter().map(|(_, _, event)| event).collect())
    }

    /// Compute and classify in one step.
    pub fn analyze(&self, series: &CandleSeries) -> Result<Analysis> {
        let signal = self.compute_signal(series)?;
        let events = self.classify(&signal)?;
        Ok(Analysis { signal, events })
    }

    fn should_include(&self, event: &PatternEvent) -> bool {
        if let Some(ref kinds) = self.config.kind_filter {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(ref ids) = self.config.pattern_filter {
            if !ids.contains(&event.pattern_id) {
                return false;
            }
        }
        true
    }

    fn validate(&self) -> Result<()> {
        self.indicator.validate()?;
        for d in &self.builtin {
            d.validate_config()?;
        }
        for d in &self.custom {
            d.validate_config()?;
        }
        Ok(())
    }
}

fn validate_candles(series: &CandleSeries) -> Result<()> {
    for (i, candle) in series.candles().iter().enumerate() {
        candle.validate().map_err(|e| match e {
            PatternError::InvalidOHLCV { reason, .. } => {
                PatternError::InvalidOHLCV { index: i, reason }
            }
            other => other,
        })?;
    }
    Ok(())
}

fn build_event(
    signal: &WaveSignal,
    line: &WaveLine<'_>,
    pattern_id: PatternId,
    detection: Detection,
) -> Result<PatternEvent> {
    let violation = |what: &str| {
        PatternError::InternalInvariantViolation(format!(
            "{} on {} {}: {what} (indices {:?})",
            pattern_id.as_str(),
            signal.symbol(),
            signal.timeframe(),
            detection.indices
        ))
    };

    if detection.indices.windows(2).any(|w| w[1] <= w[0]) {
        return Err(violation("evidence not strictly increasing"));
    }

    let mut evidence = Vec::with_capacity(detection.indices.len());
    for &i in &detection.indices {
        let value = line.value(i).ok_or_else(|| violation("evidence on undefined point"))?;
        let timestamp = line
            .timestamp(i)
            .ok_or_else(|| violation("evidence outside signal"))?;
        evidence.push(WavePoint { timestamp, value });
    }
    let detected_at = evidence
        .last()
        .map(|p| p.timestamp)
        .ok_or_else(|| violation("empty evidence"))?;

    Ok(PatternEvent {
        symbol: signal.symbol().to_string(),
        timeframe: signal.timeframe(),
        pattern_id,
        kind: PatternKind::new(detection.direction, line.kind),
        detected_at,
        evidence,
        suggested_position_hint: detection.position_hint,
    })
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating WaveEngine instances
pub struct EngineBuilder {
    indicator: WaveIndicator,
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn WaveDetector>>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            indicator: WaveIndicator::default(),
            builtin: Vec::new(),
            custom: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replace the wave indicator
    pub fn indicator(mut self, indicator: WaveIndicator) -> Self {
        self.indicator = indicator;
        self
    }

    /// Bull and bear threshold detectors plus bull and bear formation detectors
    pub fn with_all_defaults(self) -> Self {
        self.with_threshold_defaults().with_formation_defaults()
    }

    /// Bull and bear threshold detectors with default thresholds
    pub fn with_threshold_defaults(mut self) -> Self {
        self.builtin.extend([
            BuiltinDetector::Threshold(ThresholdDetector::bull()),
            BuiltinDetector::Threshold(ThresholdDetector::bear()),
        ]);
        self
    }

    /// Bull and bear five-point formation detectors
    pub fn with_formation_defaults(mut self) -> Self {
        self.builtin.extend([
            BuiltinDetector::Formation(FormationDetector::bull()),
            BuiltinDetector::Formation(FormationDetector::bear()),
        ]);
        self
    }

    /// Add a builtin detector (fast path)
    pub fn add(mut self, detector: impl Into<BuiltinDetector>) -> Self {
        self.builtin.push(detector.into());
        self
    }

    /// Add a builtin detector after validating its config
    pub fn try_add(mut self, detector: impl Into<BuiltinDetector>) -> Result<Self> {
        let detector = detector.into();
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Add a custom detector (slow path)
    pub fn add_custom<D: WaveDetector + 'static>(mut self, detector: D) -> Self {
        self.custom.push(Box::new(detector));
        self
    }

    /// Enable/disable candle validation before computing the signal
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Emit only the given pattern kinds
    pub fn only_kinds(mut self, kinds: impl IntoIterator<Item = PatternKind>) -> Self {
        self.config.kind_filter = Some(kinds.into_iter().collect());
        self
    }

    /// Emit only patterns from the given detectors
    pub fn only_patterns(mut self, ids: impl IntoIterator<Item = PatternId>) -> Self {
        self.config.pattern_filter = Some(ids.into_iter().collect());
        self
    }

    /// Build the engine, validating the indicator and every detector
    pub fn build(self) -> Result<WaveEngine> {
        let engine = WaveEngine {
            indicator: self.indicator,
            builtin: self.builtin,
            custom: self.custom,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// PARALLEL ANALYSIS
// ============================================================

use rayon::prelude::*;

/// Events found in a single series
#[derive(Debug)]
pub struct AnalysisResult {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub events: Vec<PatternEvent>,
}

/// Error from analyzing a single series
#[derive(Debug)]
pub struct AnalysisError {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub error: PatternError,
}

/// Analyze many series in parallel, splitting successes from failures
pub fn analyze_parallel<'a, I>(
    engine: &WaveEngine,
    series: I,
) -> (Vec<AnalysisResult>, Vec<AnalysisError>)
where
    I: IntoParallelIterator<Item = &'a CandleSeries>,
{
    let results: Vec<_> = series
        .into_par_iter()
        .map(|s| {
            engine
                .analyze(s)
                .map(|analysis| AnalysisResult {
                    symbol: s.symbol().to_string(),
                    timeframe: s.timeframe(),
                    events: analysis.events,
                })
                .map_err(|error| AnalysisError {
                    symbol: s.symbol().to_string(),
                    timeframe: s.timeframe(),
                    error,
                })
        })
        .collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(r) => successes.push(r),
            Err(e) => errors.push(e),
        }
    }

    (successes, errors)
}

// ============================================================
// TESTS
// ============================================================
