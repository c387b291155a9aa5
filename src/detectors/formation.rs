//! Five-point wave formation
//!
//! Bullish shape, oldest to newest: a dip below zero, a high first peak (H1),
//! a trough (L1), a lower middle peak (H2), a second trough (L2) and a high
//! third peak (H3). The bearish formation is the same shape on the negated
//! wave. Default ranges are calibrated for the channel-index transform.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::{argmin_latest, significant_peaks};
use crate::{
    params::{get_level, get_period, ParamMeta, ParameterizedDetector},
    Detection, Direction, PatternError, PatternId, Period, Result, WaveDetector, WaveLine,
};

impl_directional!(FormationDetector);

/// Initial point, three peaks and two troughs
const FORMATION_POINTS: usize = 6;

// ============================================================
// CONFIGURATION
// ============================================================

/// Value ranges are inclusive and given for the bullish orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormationParams {
    /// Most recent points examined
    pub window: Period,
    pub prominence: f64,
    /// Range for H1 and H3
    pub outer_peak: (f64, f64),
    /// Range for H2
    pub middle_peak: (f64, f64),
    /// Range for L1 and L2
    pub trough: (f64, f64),
    /// Minimum drop from H1/H3 to H2 and from H2 to L1/L2
    pub min_step: f64,
}

impl Default for FormationParams {
    fn default() -> Self {
        Self {
            window: Period::new_const(50),
            prominence: 10.0,
            outer_peak: (40.0, 100.0),
            middle_peak: (10.0, 100.0),
            trough: (-10.0, 60.0),
            min_step: 5.0,
        }
    }
}

impl FormationParams {
    pub fn validate(&self) -> Result<()> {
        if self.window.get() < FORMATION_POINTS {
            return Err(PatternError::OutOfRange {
                field: "window",
                value: self.window.get() as f64,
                min: FORMATION_POINTS as f64,
                max: f64::INFINITY,
            });
        }
        if !self.prominence.is_finite() || self.prominence < 0.0 {
            return Err(PatternError::InvalidValue("Prominence must be finite and >= 0"));
        }
        if !self.min_step.is_finite() || self.min_step < 0.0 {
            return Err(PatternError::InvalidValue("Minimum step must be finite and >= 0"));
        }
        for (name, (lo, hi)) in [
            ("outer_peak", self.outer_peak),
            ("middle_peak", self.middle_peak),
            ("trough", self.trough),
        ] {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(PatternError::InvalidConfig(format!(
                    "{name} range [{lo}, {hi}] is empty"
                )));
            }
        }
        Ok(())
    }
}

#[inline]
fn within(value: f64, (lo, hi): (f64, f64)) -> bool {
    lo <= value && value <= hi
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone)]
pub struct FormationDetector {
    pub direction: Direction,
    pub params: FormationParams,
}

impl FormationDetector {
    pub fn new(direction: Direction, params: FormationParams) -> Self {
        Self { direction, params }
    }

    /// Formation indices within `u` (the window in bullish orientation).
    fn locate(&self, u: &[f64]) -> Option<[usize; FORMATION_POINTS]> {
        let p = &self.params;
        let peaks = significant_peaks(u, p.prominence);

        // Oldest qualifying peak, then the next qualifying peak after each
        let h1 = peaks.iter().copied().find(|&k| within(u[k], p.outer_peak))?;
        let h2 = peaks
            .iter()
            .copied()
            .find(|&k| k > h1 && within(u[k], p.middle_peak))?;
        let h3 = peaks
            .iter()
            .copied()
            .find(|&k| k > h2 && within(u[k], p.outer_peak))?;

        let initial = argmin_latest(u, 0..h1 + 1)?;
        let l1 = argmin_latest(u, h1 + 1..h2 + 1)?;
        let l2 = argmin_latest(u, h2 + 1..h3 + 1)?;

        if u[initial] >= 0.0 || !within(u[l1], p.trough) || !within(u[l2], p.trough) {
            return None;
        }

        let steps_ok = u[h1] - u[h2] >= p.min_step
            && u[h3] - u[h2] >= p.min_step
            && u[h2] - u[l1] >= p.min_step
            && u[h2] - u[l2] >= p.min_step;
        let points = [initial, h1, l1, h2, l2, h3];
        let ordered = points.windows(2).all(|w| w[0] < w[1]);

        (steps_ok && ordered).then_some(points)
    }
}

impl WaveDetector for FormationDetector {
    fn id(&self) -> PatternId {
        match self.direction {
            Direction::Bullish => PatternId("FORMATION_BULL"),
            Direction::Bearish => PatternId("FORMATION_BEAR"),
        }
    }

    fn min_points(&self) -> usize {
        FORMATION_POINTS
    }

    /// At most one formation per line, located in the trailing window.
    fn detect(&self, line: &WaveLine<'_>) -> Vec<Detection> {
        let len = line.len();
        let start = line
            .defined_tail_start()
            .max(len.saturating_sub(self.params.window.get()));

        let sign = self.direction.sign();
        let u: Vec<f64> = (start..len)
            .filter_map(|i| line.value(i))
            .map(|v| sign * v)
            .collect();
        if u.len() < FORMATION_POINTS {
            return Vec::new();
        }

        match self.locate(&u) {
            Some(points) => vec![Detection {
                direction: self.direction,
                indices: points.iter().map(|&k| start + k).collect(),
                position_hint: None,
            }],
            None => Vec::new(),
        }
    }

    fn validate_config(&self) -> Result<()> {
        self.params.validate()
    }
}

// ============================================================
// PARAMETERS
// ============================================================

const FORMATION_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("window", 50.0, (20.0, 100.0, 10.0), "Most recent points examined"),
    ParamMeta::level("prominence", 10.0, (5.0, 30.0, 5.0), "Minimum peak prominence"),
    ParamMeta::level("min_step", 5.0, (0.0, 20.0, 2.5), "Minimum gap between neighbouring points"),
];

impl ParameterizedDetector for FormationParams {
    fn param_meta() -> &'static [ParamMeta] {
        FORMATION_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let built = Self {
            window: get_period(params, "window", 50)?,
            prominence: get_level(params, "prominence", 10.0)?,
            min_step: get_level(params, "min_step", 5.0)?,
            ..Self::default()
        };
        built.validate()?;
        Ok(built)
    }

    fn pattern_id_str() -> &'static str {
        "FORMATION"
    }
}

// ============================================================
// TESTS
// ============================================================
