// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Detection of leading non-steady-state volumes.

The global mean signal of the first volumes is scored with the modified
z-score `0.6745 * |x - median| / MAD`. Leading volumes scoring above the
outlier threshold are counted until the first volume that does not.
*/

use nuisance_structures::FunctionalSeries;
use tracing::debug;

/// Volumes considered when looking for the initial transient
pub const MAX_SCANNED_VOLUMES: usize = 50;

/// Modified z-score above which a volume is an outlier
pub const OUTLIER_THRESHOLD: f64 = 3.5;

const MAD_SCALE: f64 = 0.6745;

/// Number of leading volumes that are not yet at steady state.
pub fn detect_non_steady_state(series: &FunctionalSeries) -> usize {
    let mut signal = series.global_mean();
    signal.truncate(MAX_SCANNED_VOLUMES);
    let count = count_leading_outliers(&signal);
    debug!(
        target: "nuisance-confounds",
        "[STEADY-STATE] {} leading non-steady-state volumes in '{}'",
        count,
        series.name()
    );
    count
}

/// Leading entries of `signal` whose modified z-score exceeds the threshold.
pub fn count_leading_outliers(signal: &[f64]) -> usize {
    if signal.is_empty() {
        return 0;
    }
    let center = median(signal);
    let deviations: Vec<f64> = signal.iter().map(|x| (x - center).abs()).collect();
    let mad = median(&deviations);
    if !(mad > 0.0) {
        return 0;
    }
    deviations
        .iter()
        .take_while(|&&d| MAD_SCALE * d / mad > OUTLIER_THRESHOLD)
        .count()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
