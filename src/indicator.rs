//! Wave indicator: fast and slow EMA-derived oscillators
//!
//! Each wave expresses how far price sits from its own EMA. The fast wave uses
//! the short EMA period, the slow wave the long one. Nothing is carried between
//! invocations: the signal is recomputed from the full candle window every
//! time, so two calls over the same candles produce identical values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeframe::{CandleSeries, Timeframe};
use crate::{Direction, OHLCVExt, PatternError, Period, Result, WaveKind, OHLCV};

/// Guards the channel-index denominator against a flat market.
const CHANNEL_EPSILON: f64 = 1e-10;

// ============================================================
// EMA
// ============================================================

/// Incremental exponential moving average
///
/// The first `period - 1` pushes return `None`. The value at push `period` is
/// the simple average of those inputs; after that
/// `ema = alpha * x + (1 - alpha) * prev` with `alpha = 2 / (period + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
    seed_sum: f64,
    seen: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: Period) -> Self {
        let period = period.get();
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seen: 0,
            value: None,
        }
    }

    pub fn push(&mut self, x: f64) -> Option<f64> {
        match self.value {
            Some(prev) => {
                let next = self.alpha * x + (1.0 - self.alpha) * prev;
                self.value = Some(next);
            }
            None => {
                self.seed_sum += x;
                self.seen += 1;
                if self.seen == self.period {
                    self.value = Some(self.seed_sum / self.period as f64);
                }
            }
        }
        self.value
    }

    #[inline]
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// EMA of a full sequence, `None` during warm-up.
pub fn ema(values: &[f64], period: Period) -> Vec<Option<f64>> {
    let mut acc = Ema::new(period);
    values.iter().map(|&x| acc.push(x)).collect()
}

/// EMA over the defined part of a sequence; undefined inputs stay undefined.
fn ema_defined(values: &[Option<f64>], period: Period) -> Vec<Option<f64>> {
    let mut acc = Ema::new(period);
    values
        .iter()
        .map(|v| v.and_then(|x| acc.push(x)))
        .collect()
}

// ============================================================
// PRICE SOURCE / TRANSFORM
// ============================================================

/// Price series the EMAs are computed on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    #[default]
    Close,
    /// Typical price (high + low + close) / 3
    Hlc3,
    /// Typical price of the Heikin-Ashi candles
    HeikinAshiHlc3,
}

impl PriceSource {
    pub fn prices<T: OHLCV>(&self, bars: &[T]) -> Vec<f64> {
        match self {
            PriceSource::Close => bars.iter().map(|b| b.close()).collect(),
            PriceSource::Hlc3 => bars.iter().map(|b| b.typical_price()).collect(),
            PriceSource::HeikinAshiHlc3 => heikin_ashi_hlc3(bars),
        }
    }
}

fn heikin_ashi_hlc3<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut prev: Option<(f64, f64)> = None; // (ha_open, ha_close)

    for bar in bars {
        let ha_close = (bar.open() + bar.high() + bar.low() + bar.close()) / 4.0;
        let (ha_open, ha_high, ha_low) = match prev {
            None => (bar.open(), bar.high(), bar.low()),
            Some((p_open, p_close)) => {
                let ha_open = (p_open + p_close) / 2.0;
                (
                    ha_open,
                    bar.high().max(ha_open).max(ha_close),
                    bar.low().min(ha_open).min(ha_close),
                )
            }
        };
        out.push((ha_high + ha_low + ha_close) / 3.0);
        prev = Some((ha_open, ha_close));
    }

    out
}

/// How the deviation of price from its EMA is normalized
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaveTransform {
    /// `(price - ema) / ema * 100`
    #[default]
    Percent,
    /// `price - ema`
    SignedOffset,
    /// `(price - ema) / (scale * ema(|price - ema|))`, roughly bounded to ±100
    ChannelIndex { scale: f64 },
}

impl WaveTransform {
    /// Leading points left undefined for a given EMA period.
    pub fn warmup(&self, period: Period) -> usize {
        let base = period.get() - 1;
        match self {
            WaveTransform::Percent | WaveTransform::SignedOffset => base,
            WaveTransform::ChannelIndex { .. } => 2 * base,
        }
    }

    /// Wave values for `prices`; non-finite results are reported as undefined.
    pub fn wave(&self, prices: &[f64], period: Period) -> Vec<Option<f64>> {
        let averages = ema(prices, period);

        let raw: Vec<Option<f64>> = match *self {
            WaveTransform::Percent => prices
                .iter()
                .zip(&averages)
                .map(|(&p, e)| e.map(|e| (p - e) / e * 100.0))
                .collect(),
            WaveTransform::SignedOffset => prices
                .iter()
                .zip(&averages)
                .map(|(&p, e)| e.map(|e| p - e))
                .collect(),
            WaveTransform::ChannelIndex { scale } => {
                let abs_dev: Vec<Option<f64>> = prices
                    .iter()
                    .zip(&averages)
                    .map(|(&p, e)| e.map(|e| (p - e).abs()))
                    .collect();
                let dispersion = ema_defined(&abs_dev, period);
                prices
                    .iter()
                    .zip(averages.iter().zip(&dispersion))
                    .map(|(&p, (e, d))| match (e, d) {
                        (Some(e), Some(d)) => Some((p - e) / (scale * (d + CHANNEL_EPSILON))),
                        _ => None,
                    })
                    .collect()
            }
        };

        raw.into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if let WaveTransform::ChannelIndex { scale } = self {
            if !scale.is_finite() || *scale <= 0.0 {
                return Err(PatternError::InvalidValue(
                    "Channel index scale must be finite and > 0",
                ));
            }
        }
        Ok(())
    }
}

// ============================================================
// WAVE SIGNAL
// ============================================================

/// One row of a [`WaveSignal`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalPoint {
    pub timestamp: DateTime<Utc>,
    pub fast: Option<f64>,
    pub slow: Option<f64>,
}

/// Fast and slow wave values aligned 1:1 with the candles they came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaveSignal {
    symbol: String,
    timeframe: Timeframe,
    timestamps: Vec<DateTime<Utc>>,
    fast: Vec<Option<f64>>,
    slow: Vec<Option<f64>>,
    fast_warmup: usize,
    slow_warmup: usize,
}

impl WaveSignal {
    /// Assemble a signal from precomputed values.
    ///
    /// All three sequences must have the same length and timestamps must be
    /// strictly increasing.
    pub fn from_parts(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        timestamps: Vec<DateTime<Utc>>,
        fast: Vec<Option<f64>>,
        slow: Vec<Option<f64>>,
    ) -> Result<Self> {
        if fast.len() != timestamps.len() || slow.len() != timestamps.len() {
            return Err(PatternError::InternalInvariantViolation(format!(
                "wave lengths differ: {} timestamps, {} fast, {} slow",
                timestamps.len(),
                fast.len(),
                slow.len()
            )));
        }
        if timestamps.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PatternError::InternalInvariantViolation(
                "wave timestamps are not strictly increasing".into(),
            ));
        }

        let leading_none = |v: &[Option<f64>]| v.iter().take_while(|x| x.is_none()).count();
        Ok(Self {
            symbol: symbol.into(),
            timeframe,
            fast_warmup: leading_none(&fast),
            slow_warmup: leading_none(&slow),
            timestamps,
            fast,
            slow,
        })
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
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn fast(&self) -> &[Option<f64>] {
        &self.fast
    }

    pub fn slow(&self) -> &[Option<f64>] {
        &self.slow
    }

    /// Leading undefined points of the given wave.
    pub fn warmup(&self, kind: WaveKind) -> usize {
        match kind {
            WaveKind::Fast => self.fast_warmup,
            WaveKind::Slow => self.slow_warmup,
        }
    }

    #[inline]
    pub fn fast_warmup(&self) -> usize {
        self.fast_warmup
    }

    #[inline]
    pub fn slow_warmup(&self) -> usize {
        self.slow_warmup
    }

    /// Points where both waves are defined.
    pub fn defined_len(&self) -> usize {
        self.fast
            .iter()
            .zip(&self.slow)
            .filter(|(f, s)| f.is_some() && s.is_some())
            .count()
    }

    pub fn line(&self, kind: WaveKind) -> WaveLine<'_> {
        let values = match kind {
            WaveKind::Fast => &self.fast,
            WaveKind::Slow => &self.slow,
        };
        WaveLine::new(kind, &self.timestamps, values)
    }

    pub fn points(&self) -> impl Iterator<Item = SignalPoint> + '_ {
        self.timestamps
            .iter()
            .zip(self.fast.iter().zip(&self.slow))
            .map(|(&timestamp, (&fast, &slow))| SignalPoint {
                timestamp,
                fast,
                slow,
            })
    }

    /// Fast/slow crossovers in time order, reported at the first point after
    /// the cross.
    pub fn crossovers(&self) -> Vec<Crossover> {
        let mut out = Vec::new();
        for i in 1..self.len() {
            let (Some(f0), Some(s0), Some(f1), Some(s1)) =
                (self.fast[i - 1], self.slow[i - 1], self.fast[i], self.slow[i])
            else {
                continue;
            };
            let direction = if f0 < s0 && f1 >= s1 {
                Direction::Bullish
            } else if f0 > s0 && f1 <= s1 {
                Direction::Bearish
            } else {
                continue;
            };
            out.push(Crossover {
                index: i,
                timestamp: self.timestamps[i],
                direction,
            });
        }
        out
    }
}

/// Point where the fast wave crosses the slow wave
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Crossover {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    /// Bullish when the fast wave moves from below to at-or-above the slow wave
    pub direction: Direction,
}

/// Borrowed view of one wave of a signal, the input of every detector
#[derive(Debug, Clone, Copy)]
pub struct WaveLine<'a> {
    pub kind: WaveKind,
    timestamps: &'a [DateTime<Utc>],
    values: &'a [Option<f64>],
}

impl<'a> WaveLine<'a> {
    /// `timestamps` and `values` must have equal length.
    pub fn new(kind: WaveKind, timestamps: &'a [DateTime<Utc>], values: &'a [Option<f64>]) -> Self {
        debug_assert_eq!(timestamps.len(), values.len());
        Self {
            kind,
            timestamps,
            values,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len().min(self.timestamps.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }

    #[inline]
    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.timestamps.get(index).copied()
    }

    pub fn values(&self) -> &'a [Option<f64>] {
        self.values
    }

    /// Start of the trailing run of defined values.
    pub fn defined_tail_start(&self) -> usize {
        let len = self.len();
        let undefined_from_end = self.values[..len]
            .iter()
            .rev()
            .position(|v| v.is_none());
        match undefined_from_end {
            Some(k) => len - k,
            None => 0,
        }
    }
}

// ============================================================
// INDICATOR
// ============================================================

/// Fast/slow wave indicator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveIndicator {
    pub fast_period: Period,
    pub slow_period: Period,
    pub source: PriceSource,
    pub transform: WaveTransform,
}

impl Default for WaveIndicator {
    fn default() -> Self {
        Self {
            fast_period: Period::new_const(9),
            slow_period: Period::new_const(12),
            source: PriceSource::Close,
            transform: WaveTransform::Percent,
        }
    }
}

impl WaveIndicator {
    pub fn new(fast_period: Period, slow_period: Period) -> Self {
        Self {
            fast_period,
            slow_period,
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: PriceSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_transform(mut self, transform: WaveTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.fast_period >= self.slow_period {
            return Err(PatternError::InvalidConfig(format!(
                "fast period {} must be shorter than slow period {}",
                self.fast_period.get(),
                self.slow_period.get()
            )));
        }
        self.transform.validate()
    }

    /// Compute the wave signal over the whole series.
    ///
    /// Fails with `InsufficientData` when there are fewer candles than the
    /// slow period or when the series has a gap.
    pub fn compute(&self, series: &CandleSeries) -> Result<WaveSignal> {
        self.validate()?;

        let len = series.len();
        let need = self.slow_period.get();
        if len < need {
            return Err(PatternError::InsufficientData {
                what: "candles",
                need,
                got: len,
            });
        }
        let contiguous = series.contiguous_tail_len();
        if contiguous < len {
            return Err(PatternError::InsufficientData {
                what: "contiguous candles",
                need: len,
                got: contiguous,
            });
        }

        let prices = self.source.prices(series.candles());
        let timestamps = series.candles().iter().map(|c| c.open_time).collect();

        Ok(WaveSignal {
            symbol: series.symbol().to_string(),
            timeframe: series.timeframe(),
            timestamps,
            fast: self.transform.wave(&prices, self.fast_period),
            slow: self.transform.wave(&prices, self.slow_period),
            fast_warmup: self.transform.warmup(self.fast_period),
            slow_warmup: self.transform.warmup(self.slow_period),
        })
    }
}

// ============================================================
// TESTS
// ============================================================
