//! Threshold crossing detector
//!
//! A candidate forms when the wave crosses the entry threshold in the
//! detector's direction. It is confirmed when the confirmation rule holds
//! within `max_lookahead` points, otherwise it expires.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::crossed_above;
use crate::{
    params::{get_level, get_period, ParamMeta, ParameterizedDetector},
    Detection, Direction, PatternError, PatternId, Period, PositionHint, Result, WaveDetector,
    WaveLine,
};

impl_directional!(ThresholdDetector);

/// Peak-to-confirm ratio below which the position hint is `Small`
pub const HINT_SMALL_BELOW: f64 = 1.25;
/// Peak-to-confirm ratio below which the position hint is `Normal`
pub const HINT_NORMAL_BELOW: f64 = 2.0;

// ============================================================
// CONFIGURATION
// ============================================================

/// Shape the wave must take after the crossing to confirm a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeRule {
    /// Past `confirm` after moving in the detector's direction on each of the
    /// last `min_run` steps
    Momentum { min_run: usize },
    /// Extremum past `confirm` followed by a turn back
    Reversal,
}

impl Default for ShapeRule {
    fn default() -> Self {
        ShapeRule::Momentum { min_run: 1 }
    }
}

/// Thresholds are magnitudes; the bearish detector applies them to `-v`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdParams {
    pub entry: f64,
    pub confirm: f64,
    pub max_lookahead: Period,
    pub rule: ShapeRule,
    pub position_hint: bool,
}

impl Default for ThresholdParams {
    fn default() -> Self {
        Self {
            entry: 0.5,
            confirm: 1.5,
            max_lookahead: Period::new_const(5),
            rule: ShapeRule::default(),
            position_hint: true,
        }
    }
}

impl ThresholdParams {
    pub fn validate(&self) -> Result<()> {
        if !self.entry.is_finite() || !self.confirm.is_finite() {
            return Err(PatternError::InvalidValue(
                "Thresholds cannot be NaN or infinite",
            ));
        }
        if self.entry < 0.0 {
            return Err(PatternError::OutOfRange {
                field: "entry",
                value: self.entry,
                min: 0.0,
                max: self.confirm,
            });
        }
        if self.confirm < self.entry {
            return Err(PatternError::InvalidConfig(format!(
                "confirm threshold {} is below entry threshold {}",
                self.confirm, self.entry
            )));
        }
        if let ShapeRule::Momentum { min_run } = self.rule {
            let lookahead = self.max_lookahead.get();
            if min_run == 0 || min_run > lookahead {
                return Err(PatternError::OutOfRange {
                    field: "min_run",
                    value: min_run as f64,
                    min: 1.0,
                    max: lookahead as f64,
                });
            }
        }
        Ok(())
    }
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    pub direction: Direction,
    pub params: ThresholdParams,
}

impl ThresholdDetector {
    pub fn new(direction: Direction, params: ThresholdParams) -> Self {
        Self { direction, params }
    }

    /// First index in `(start, start + K]` where the confirmation rule holds.
    ///
    /// An undefined point inside the lookahead ends the candidate.
    fn confirm_from(&self, start: usize, signed: &[Option<f64>]) -> Option<usize> {
        let p = &self.params;
        let last = (start + p.max_lookahead.get()).min(signed.len() - 1);

        for j in start + 1..=last {
            let curr = signed[j]?;
            let prev = signed[j - 1]?;
            let confirmed = match p.rule {
                ShapeRule::Momentum { min_run } => {
                    curr >= p.confirm
                        && j - start >= min_run
                        && (j - min_run..j).all(|m| match (signed[m], signed[m + 1]) {
                            (Some(a), Some(b)) => b > a,
                            _ => false,
                        })
                }
                ShapeRule::Reversal => prev >= p.confirm && curr < prev,
            };
            if confirmed {
                return Some(j);
            }
        }
        None
    }

    fn position_hint(&self, signed: &[Option<f64>], start: usize, end: usize) -> Option<PositionHint> {
        if !self.params.position_hint {
            return None;
        }
        let peak = signed[start..=end]
            .iter()
            .flatten()
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let ratio = peak / self.params.confirm;

        Some(if ratio.is_nan() || ratio >= HINT_NORMAL_BELOW {
            PositionHint::Large
        } else if ratio >= HINT_SMALL_BELOW {
            PositionHint::Normal
        } else {
            PositionHint::Small
        })
    }
}

impl WaveDetector for ThresholdDetector {
    fn id(&self) -> PatternId {
        match self.direction {
            Direction::Bullish => PatternId("THRESHOLD_BULL"),
            Direction::Bearish => PatternId("THRESHOLD_BEAR"),
        }
    }

    fn min_points(&self) -> usize {
        self.params.max_lookahead.get() + 1
    }

    fn detect(&self, line: &WaveLine<'_>) -> Vec<Detection> {
        let sign = self.direction.sign();
        let signed: Vec<Option<f64>> = line.values().iter().map(|v| v.map(|x| sign * x)).collect();

        let mut detections = Vec::new();
        let mut i = 1;
        while i < signed.len() {
            let crossed = match (signed[i - 1], signed[i]) {
                (Some(prev), Some(curr)) => crossed_above(prev, curr, self.params.entry),
                _ => false,
            };
            if !crossed {
                i += 1;
                continue;
            }

            match self.confirm_from(i, &signed) {
                Some(j) => {
                    detections.push(Detection {
                        direction: self.direction,
                        indices: (i..=j).collect(),
                        position_hint: self.position_hint(&signed, i, j),
                    });
                    i = j + 1;
                }
                None => i += 1,
            }
        }
        detections
    }

    fn validate_config(&self) -> Result<()> {
        self.params.validate()
    }
}

// ============================================================
// PARAMETERS
// ============================================================

const THRESHOLD_PARAMS: &[ParamMeta] = &[
    ParamMeta::level("entry", 0.5, (0.0, 3.0, 0.25), "Wave level that opens a candidate"),
    ParamMeta::level("confirm", 1.5, (0.5, 5.0, 0.25), "Wave level that confirms a candidate"),
    ParamMeta::period("max_lookahead", 5.0, (1.0, 20.0, 1.0), "Points allowed for confirmation"),
    ParamMeta::period("min_run", 1.0, (1.0, 5.0, 1.0), "Consecutive steps in the trade direction"),
];

impl ParameterizedDetector for ThresholdParams {
    fn param_meta() -> &'static [ParamMeta] {
        THRESHOLD_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let built = Self {
            entry: get_level(params, "entry", 0.5)?,
            confirm: get_level(params, "confirm", 1.5)?,
            max_lookahead: get_period(params, "max_lookahead", 5)?,
            rule: ShapeRule::Momentum {
                min_run: get_period(params, "min_run", 1)?.get(),
            },
            ..Self::default()
        };
        built.validate()?;
        Ok(built)
    }

    fn pattern_id_str() -> &'static str {
        "THRESHOLD"
    }
}

// ============================================================
// TESTS
// ============================================================
