//! Scanner configuration loaded from TOML
//!
//! ```toml
//! symbols = ["BTC_USDT", "ETH_USDT"]
//! timeframes = [
//!     { target = "Min15" },
//!     { target = "Hour3", base = "Min60" },
//! ]
//! retention = 20
//!
//! [indicator]
//! fast_period = 9
//! slow_period = 12
//!
//! [classifier]
//! entry = 0.5
//! confirm = 1.5
//! max_lookahead = 5
//! rule = { kind = "momentum", min_run = 1 }
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every field is optional. A `[classifier.formation]` table turns on the
//! five-point formation detectors.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detectors::{FormationDetector, FormationParams, ThresholdDetector, ThresholdParams};
use crate::logging::LoggingConfig;
use crate::scanner::{ScanSettings, TimeframeSpec};
use crate::snapshot::{SnapshotStore, DEFAULT_RETENTION};
use crate::timeframe::Timeframe;
use crate::{Direction, EngineBuilder, PatternError, Period, Result, WaveEngine, WaveIndicator};

/// Detector parameters shared by both directions
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    #[serde(flatten)]
    pub threshold: ThresholdParams,
    /// Formation detectors run only when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formation: Option<FormationParams>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<TimeframeSpec>,
    pub indicator: WaveIndicator,
    pub classifier: ClassifierConfig,
    /// Events kept per (symbol, timeframe)
    pub retention: Period,
    pub max_concurrency: Period,
    /// Base candles requested per fetch
    pub fetch_window: Period,
    pub fetch_timeout_secs: u64,
    /// Cycle period for the host's scheduler
    pub scan_interval_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            timeframes: vec![
                TimeframeSpec::new(Timeframe::MIN15),
                TimeframeSpec::new(Timeframe::MIN60),
                TimeframeSpec::new(Timeframe::HOUR4),
                TimeframeSpec::new(Timeframe::DAY1),
            ],
            indicator: WaveIndicator::default(),
            classifier: ClassifierConfig::default(),
            retention: Period::new_const(DEFAULT_RETENTION),
            max_concurrency: Period::new_const(8),
            fetch_window: Period::new_const(500),
            fetch_timeout_secs: 10,
            scan_interval_secs: 30 * 60,
            logging: LoggingConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| PatternError::InvalidConfig(format!("failed to parse config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file from disk, then parse and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PatternError::InvalidConfig(format!("read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Indicator and detector settings. Timeframe entries are checked
    /// separately by [`timeframe_plan`](Self::timeframe_plan) so one bad
    /// entry does not reject the whole file.
    pub fn validate(&self) -> Result<()> {
        self.indicator.validate()?;
        self.classifier.threshold.validate()?;
        if let Some(formation) = &self.classifier.formation {
            formation.validate()?;
        }
        if self.fetch_timeout_secs == 0 {
            return Err(PatternError::InvalidValue("fetch_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Timeframes to scan, minus duplicates and unusable entries.
    ///
    /// Rejected entries are logged once here and returned alongside.
    pub fn timeframe_plan(&self) -> (Vec<TimeframeSpec>, Vec<PatternError>) {
        let mut seen = HashSet::new();
        let mut plan = Vec::new();
        let mut rejected = Vec::new();

        for spec in &self.timeframes {
            let resolved = TimeframeSpec::with_base(spec.target, spec.base());
            if !seen.insert(resolved) {
                continue;
            }
            match resolved.validate() {
                Ok(()) => plan.push(resolved),
                Err(e) => {
                    warn!(timeframe = %spec.target, base = %spec.base(), error = %e, "Dropping timeframe from scan plan");
                    rejected.push(e);
                }
            }
        }
        (plan, rejected)
    }

    /// Threshold detectors in both directions, plus formation detectors when
    /// configured.
    pub fn build_engine(&self) -> Result<WaveEngine> {
        let threshold = &self.classifier.threshold;
        let mut builder = EngineBuilder::new()
            .indicator(self.indicator.clone())
            .add(ThresholdDetector::new(Direction::Bullish, threshold.clone()))
            .add(ThresholdDetector::new(Direction::Bearish, threshold.clone()));

        if let Some(formation) = &self.classifier.formation {
            builder = builder
                .add(FormationDetector::new(Direction::Bullish, formation.clone()))
                .add(FormationDetector::new(Direction::Bearish, formation.clone()));
        }
        builder.build()
    }

    pub fn build_store(&self) -> SnapshotStore {
        SnapshotStore::new(self.retention)
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            max_concurrency: self.max_concurrency.get(),
            fetch_window: self.fetch_window.get(),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

// ============================================================
// TESTS
// ============================================================
