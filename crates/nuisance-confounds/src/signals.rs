// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Mean time courses of the functional series within each ROI.

use crate::error::{Component, ConfoundError, ConfoundResult};
use crate::table::ConfoundsTable;
use nuisance_structures::{FunctionalSeries, Roi, AFFINE_TOLERANCE};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::debug;

/// One column per ROI, named by `names` in the same order.
///
/// Each ROI is averaged independently, so overlapping ROIs share voxels.
pub fn extract(
    series: &FunctionalSeries,
    rois: &[Roi],
    names: &[String],
) -> ConfoundResult<ConfoundsTable> {
    if rois.len() != names.len() {
        return Err(ConfoundError::invalid(
            Component::SignalExtractor,
            "names",
            format!("{} ROIs but {} names", rois.len(), names.len()),
        ));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = names.iter().find(|n| !seen.insert(n.as_str())) {
        return Err(ConfoundError::invalid(
            Component::SignalExtractor,
            duplicate.clone(),
            "duplicate regressor name",
        ));
    }

    for roi in rois {
        if roi.shape() != series.spatial_shape()
            || !roi.affine().approx_eq(series.affine(), AFFINE_TOLERANCE)
        {
            return Err(ConfoundError::GridMismatch {
                component: Component::SignalExtractor,
                input: roi.name().to_string(),
                reason: format!(
                    "ROI grid {:?} does not match series grid {:?}",
                    roi.shape(),
                    series.spatial_shape()
                ),
            });
        }
        if roi.voxel_count() == 0 {
            return Err(ConfoundError::EmptyRoi {
                component: Component::SignalExtractor,
                roi: roi.name().to_string(),
            });
        }
    }

    let columns: Vec<Vec<f64>> = rois
        .par_iter()
        .map(|roi| mean_signal(series, roi))
        .collect();

    let mut table = ConfoundsTable::new(series.n_volumes());
    for (name, values) in names.iter().zip(columns) {
        table.push_column(name.clone(), values)?;
    }
    debug!(
        target: "nuisance-confounds",
        "[SIGNALS] extracted {:?} over {} volumes",
        names,
        series.n_volumes()
    );
    Ok(table)
}

fn mean_signal(series: &FunctionalSeries, roi: &Roi) -> Vec<f64> {
    let matrix = series.masked_matrix(roi.mask(), 0);
    let n = matrix.ncols() as f64;
    matrix.rows().into_iter().map(|row| row.sum() / n).collect()
}
