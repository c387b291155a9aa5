//! Timeframes, candle series and base → derived timeframe conversion
//!
//! Exchanges only serve a handful of native resolutions. Everything else is
//! derived here by folding complete windows of base candles into one candle
//! of the target resolution.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use wavescan::timeframe::{convert, Candle, CandleSeries, Timeframe};
//!
//! let start = Utc.timestamp_opt(0, 0).unwrap();
//! let candles: Vec<Candle> = (0..6)
//!     .map(|i| {
//!         let t = start + Timeframe::MIN60.duration() * i;
//!         Candle::new(t, 100.0, 101.0, 99.0, 100.5, 10.0)
//!     })
//!     .collect();
//! let hourly = CandleSeries::new("BTC_USDT", Timeframe::MIN60, candles).unwrap();
//!
//! let three_hour = convert(&hourly, "Hour3".parse().unwrap()).unwrap();
//! assert_eq!(three_hour.len(), 2);
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{PatternError, Result, OHLCV};

const MINUTES_PER_HOUR: u32 = 60;
const MINUTES_PER_DAY: u32 = 24 * MINUTES_PER_HOUR;
const MILLIS_PER_MINUTE: i64 = 60_000;

// ============================================================
// TIMEFRAME
// ============================================================

/// Candle resolution, a whole number of minutes
///
/// Displayed with the exchange interval names: `Min15`, `Hour4`, `Day1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timeframe(u32);

impl Timeframe {
    pub const MIN1: Self = Self(1);
    pub const MIN5: Self = Self(5);
    pub const MIN15: Self = Self(15);
    pub const MIN30: Self = Self(30);
    pub const MIN60: Self = Self(60);
    pub const HOUR4: Self = Self(240);
    pub const DAY1: Self = Self(MINUTES_PER_DAY);

    /// Create a timeframe, validating minutes > 0
    pub fn from_minutes(minutes: u32) -> Result<Self> {
        if minutes == 0 {
            return Err(PatternError::InvalidValue("Timeframe must be > 0 minutes"));
        }
        Ok(Self(minutes))
    }

    #[inline]
    pub const fn minutes(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn millis(self) -> i64 {
        i64::from(self.0) * MILLIS_PER_MINUTE
    }

    #[inline]
    pub fn duration(self) -> Duration {
        Duration::minutes(i64::from(self.0))
    }

    /// True when candle boundaries of this timeframe line up with UTC midnight.
    pub fn is_day_aligned(self) -> bool {
        MINUTES_PER_DAY % self.0 == 0 || self.0 % MINUTES_PER_DAY == 0
    }

    /// Number of `base` candles that make up one candle of `self`.
    ///
    /// `None` when `self` is not a whole multiple of `base`.
    pub fn ratio_to(self, base: Timeframe) -> Option<usize> {
        (self.0 >= base.0 && self.0 % base.0 == 0).then(|| (self.0 / base.0) as usize)
    }

    /// Native resolution a derived timeframe is built from.
    ///
    /// Hourly multiples come from 60-minute candles, quarter-hour multiples
    /// from 15-minute candles, 5-minute multiples from 5-minute candles and
    /// everything else from 1-minute candles.
    pub fn default_base(self) -> Timeframe {
        [Self::MIN60, Self::MIN15, Self::MIN5]
            .into_iter()
            .find(|base| self.0 % base.0 == 0)
            .unwrap_or(Self::MIN1)
    }

    /// Start of the window containing `time`: the largest multiple of this
    /// timeframe (counted from the Unix epoch) that is ≤ `time`.
    pub fn window_start(self, time: DateTime<Utc>) -> DateTime<Utc> {
        let millis = time.timestamp_millis();
        let start = millis - millis.rem_euclid(self.millis());
        Utc.timestamp_millis_opt(start).single().unwrap_or(time)
    }

    #[inline]
    pub fn is_aligned(self, time: DateTime<Utc>) -> bool {
        time.timestamp_millis().rem_euclid(self.millis()) == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        if m % MINUTES_PER_DAY == 0 {
            write!(f, "Day{}", m / MINUTES_PER_DAY)
        } else if m >= MINUTES_PER_HOUR && m % MINUTES_PER_HOUR == 0 {
            write!(f, "Hour{}", m / MINUTES_PER_HOUR)
        } else {
            write!(f, "Min{m}")
        }
    }
}

impl FromStr for Timeframe {
    type Err = PatternError;

    /// Accepts `Min5` / `Hour4` / `Day1` and the short forms `5m` / `4h` / `1d`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || PatternError::InvalidConfig(format!("unknown timeframe `{s}`"));

        let (amount, unit) = if let Some(rest) = s.strip_prefix("Min") {
            (rest, 1)
        } else if let Some(rest) = s.strip_prefix("Hour") {
            (rest, MINUTES_PER_HOUR)
        } else if let Some(rest) = s.strip_prefix("Day") {
            (rest, MINUTES_PER_DAY)
        } else if let Some(rest) = s.strip_suffix('m') {
            (rest, 1)
        } else if let Some(rest) = s.strip_suffix('h') {
            (rest, MINUTES_PER_HOUR)
        } else if let Some(rest) = s.strip_suffix('d') {
            (rest, MINUTES_PER_DAY)
        } else {
            return Err(invalid());
        };

        let amount: u32 = amount.parse().map_err(|_| invalid())?;
        let minutes = amount.checked_mul(unit).ok_or_else(invalid)?;
        Timeframe::from_minutes(minutes)
    }
}

impl Serialize for Timeframe {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================
// CANDLES
// ============================================================

/// One OHLCV bucket. `open_time` is aligned to the owning series' timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Candle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.open_time.timestamp_millis())
    }
}

/// Candles of one symbol at one timeframe, strictly increasing by open time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleSeries {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series, rejecting unaligned or non-increasing open times.
    ///
    /// Either condition means the data source broke its contract, so it is
    /// reported as [`PatternError::InternalInvariantViolation`].
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Result<Self> {
        let symbol = symbol.into();

        for (i, candle) in candles.iter().enumerate() {
            if !timeframe.is_aligned(candle.open_time) {
                return Err(PatternError::InternalInvariantViolation(format!(
                    "{symbol} {timeframe}: candle {i} at {} is not aligned",
                    candle.open_time
                )));
            }
            if i > 0 && candle.open_time <= candles[i - 1].open_time {
                return Err(PatternError::InternalInvariantViolation(format!(
                    "{symbol} {timeframe}: candle {i} at {} does not advance past {}",
                    candle.open_time,
                    candles[i - 1].open_time
                )));
            }
        }

        Ok(Self {
            symbol,
            timeframe,
            candles,
        })
    }

    pub fn empty(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            candles: Vec::new(),
        }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    #[inline]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// True if any two neighbouring candles are more than one timeframe apart.
    pub fn has_gaps(&self) -> bool {
        self.contiguous_tail_len() < self.candles.len()
    }

    /// Number of trailing candles with no gap between them.
    pub fn contiguous_tail_len(&self) -> usize {
        let step = self.timeframe.millis();
        let broken = self.candles.windows(2).rposition(|pair| {
            pair[1].open_time.timestamp_millis() - pair[0].open_time.timestamp_millis() != step
        });
        match broken {
            Some(i) => self.candles.len() - (i + 1),
            None => self.candles.len(),
        }
    }

    pub fn into_candles(self) -> Vec<Candle> {
        self.candles
    }
}

// ============================================================
// CONVERSION
// ============================================================

/// Running aggregate of one target window
struct Window {
    candle: Candle,
    count: usize,
}

impl Window {
    fn open(start: DateTime<Utc>, first: &Candle) -> Self {
        Self {
            candle: Candle::new(
                start,
                first.open,
                first.high,
                first.low,
                first.close,
                first.volume,
            ),
            count: 1,
        }
    }

    fn fold(&mut self, next: &Candle) {
        self.candle.high = self.candle.high.max(next.high);
        self.candle.low = self.candle.low.min(next.low);
        self.candle.close = next.close;
        self.candle.volume += next.volume;
        self.count += 1;
    }
}

/// Aggregate `series` into `target` resolution.
///
/// Only windows holding exactly `target / base` candles are emitted; the
/// still-forming window and windows with a missing base candle are dropped,
/// so every derived candle is final.
pub fn convert(series: &CandleSeries, target: Timeframe) -> Result<CandleSeries> {
    if series.is_empty() {
        return Err(PatternError::InsufficientData {
            what: "base candles",
            need: 1,
            got: 0,
        });
    }

    let base = series.timeframe();
    let per_window = target
        .ratio_to(base)
        .ok_or(PatternError::UnsupportedTimeframe { base, target })?;
    if per_window == 1 {
        return Ok(series.clone());
    }

    let mut derived = Vec::with_capacity(series.len() / per_window + 1);
    let mut current: Option<Window> = None;

    for candle in series.candles() {
        let start = target.window_start(candle.open_time);
        match current.as_mut() {
            Some(window) if window.candle.open_time == start => window.fold(candle),
            _ => {
                if let Some(done) = current.replace(Window::open(start, candle)) {
                    if done.count == per_window {
                        derived.push(done.candle);
                    }
                }
            }
        }
    }
    if let Some(done) = current {
        if done.count == per_window {
            derived.push(done.candle);
        }
    }

    CandleSeries::new(series.symbol(), target, derived)
}

// ============================================================
// TESTS
// ============================================================
