//! Helpers shared by the wave detectors: threshold crossings, peak finding
//! and extremum search.

use std::ops::Range;

// ============================================================
// CROSSINGS
// ============================================================

/// `prev <= level < curr`: the wave moved from at-or-below `level` to above it.
#[inline]
pub fn crossed_above(prev: f64, curr: f64, level: f64) -> bool {
    prev <= level && level < curr
}

// ============================================================
// PEAKS
// ============================================================

/// Indices of local maxima.
///
/// A flat top counts once, at its middle (rounded down). Endpoints are never
/// maxima.
pub fn local_maxima(values: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if values.len() < 3 {
        return peaks;
    }

    let last = values.len() - 1;
    let mut i = 1;
    while i < last {
        if values[i - 1] < values[i] {
            let mut ahead = i + 1;
            while ahead < last && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of a peak above the higher of its two bases.
///
/// Each base is the lowest value between the peak and the nearest higher value
/// on that side (or the series edge).
pub fn prominence(values: &[f64], peak: usize) -> f64 {
    let height = values[peak];

    let mut left_base = height;
    for &v in values[..peak].iter().rev() {
        if v > height {
            break;
        }
        left_base = left_base.min(v);
    }

    let mut right_base = height;
    for &v in &values[peak + 1..] {
        if v > height {
            break;
        }
        right_base = right_base.min(v);
    }

    height - left_base.max(right_base)
}

/// Local maxima whose prominence is at least `min_prominence`.
pub fn significant_peaks(values: &[f64], min_prominence: f64) -> Vec<usize> {
    local_maxima(values)
        .into_iter()
        .filter(|&p| prominence(values, p) >= min_prominence)
        .collect()
}

// ============================================================
// EXTREMA
// ============================================================

/// Index of the minimum inside `range`; ties go to the latest index.
pub fn argmin_latest(values: &[f64], range: Range<usize>) -> Option<usize> {
    let end = range.end.min(values.len());
    (range.start..end).fold(None, |best: Option<usize>, i| match best {
        Some(b) if values[b] < values[i] => Some(b),
        _ => Some(i),
    })
}

// ============================================================
// TESTS
// ============================================================
